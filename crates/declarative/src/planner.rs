//! Plan engine - compares the resource graph against state
//!
//! Every instance is classified as Create, Update, Replace (Destroy then
//! Create) or NoOp, and state records with no declaration become Destroys.
//! The resulting actions are ordered by sorting an action graph, so that
//! prerequisites always come first and each action records the positions
//! of the actions it waits for.

use crate::diff::{self, AttributeChange, DiffSummary};
use crate::error::{Error, Result};
use crate::graph::{ResourceGraph, ResourceInstance};
use crate::resolver::{self, topological_order};
use crate::resource::SchemaRegistry;
use crate::state::{StateRecord, StateSnapshot};
use crate::types::{Address, Attr, Attributes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

// ============================================================================
// Plan types
// ============================================================================

/// What a planned action does to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Destroy,
}

impl ActionKind {
    /// Get a symbol for display
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Destroy => "-",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Why an action was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionReason {
    /// Declared but not in state
    New,
    /// Declared attributes differ from state
    Changed,
    /// A changed attribute forces destroy-then-create
    Replacement,
    /// In state but no longer declared
    Orphaned,
    /// Destruction of everything was requested
    DestroyRequested,
}

impl fmt::Display for ActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Changed => write!(f, "changed"),
            Self::Replacement => write!(f, "must be replaced"),
            Self::Orphaned => write!(f, "no longer declared"),
            Self::DestroyRequested => write!(f, "destroy requested"),
        }
    }
}

/// One action of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub kind: ActionKind,
    pub address: Address,
    pub resource_type: String,
    /// Full declared attributes (empty for Destroy)
    #[serde(default)]
    pub attributes: Attributes,
    /// Per-attribute changes, in attribute name order
    #[serde(default)]
    pub changes: Vec<AttributeChange>,
    pub reason: ActionReason,
    /// Graph dependencies (Create/Update) or deployed dependencies (Destroy)
    #[serde(default)]
    pub dependencies: Vec<Address>,
    /// Positions of prerequisite actions in the plan
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl PlannedAction {
    /// Whether this action is one half of a replacement
    pub fn is_replacement(&self) -> bool {
        self.reason == ActionReason::Replacement
    }

    /// Attributes an Update sends to the provider. Removed attributes map
    /// to `None`.
    pub fn changed_attributes(&self) -> Vec<(&str, Option<&Attr>)> {
        self.changes
            .iter()
            .map(|c| (c.name.as_str(), c.after.as_ref()))
            .collect()
    }

    /// Label used in logs and cycle reports: `create aws_vpc.main`
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.address)
    }
}

/// An ordered list of actions plus the instances left untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    /// Instances whose state already matches (never emitted as actions)
    #[serde(default)]
    pub unchanged: Vec<Address>,
    /// Fingerprint of the state snapshot the plan was computed from
    pub state_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Check if the plan has no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Summary counts
    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_plan(self)
    }

    /// Reject the plan if state changed since it was computed
    pub fn check_fresh(&self, snapshot: &StateSnapshot) -> Result<()> {
        let actual = snapshot.fingerprint()?;
        if actual != self.state_fingerprint {
            return Err(Error::StalePlan {
                expected: self.state_fingerprint.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Options for planning
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Plan the destruction of everything in state
    pub destroy: bool,
    /// Limit the plan to these addresses (and what they require)
    pub targets: Vec<Address>,
}

impl PlanOptions {
    fn is_targeted(&self, address: &Address) -> bool {
        self.targets.iter().any(|t| t.covers(address))
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Values of an instance that are not known until apply
#[derive(Debug)]
enum Pending {
    /// Created or replaced: every output changes
    All,
    /// Updated: these attributes change
    Attributes(BTreeSet<String>),
}

enum Decision {
    Create(Vec<AttributeChange>),
    Update(Vec<AttributeChange>),
    Replace(Vec<AttributeChange>),
    NoOp,
}

/// Computes plans from a graph and a state snapshot
#[derive(Debug, Clone, Default)]
pub struct Planner {
    schema: SchemaRegistry,
}

impl Planner {
    /// Create a planner for the given type schema
    pub fn new(schema: SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Type schema in use
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Compute a plan.
    ///
    /// Fails on cycles and on state records that cannot be interpreted;
    /// never makes changes.
    pub fn plan(
        &self,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        options: &PlanOptions,
    ) -> Result<Plan> {
        self.validate_state(graph, snapshot)?;
        let order = resolver::resolve(graph)?;

        let mut creates_updates: Vec<PlannedAction> = Vec::new();
        let mut destroys: Vec<PlannedAction> = Vec::new();
        let mut unchanged = Vec::new();

        if options.destroy {
            for record in snapshot.records.values() {
                destroys.push(destroy_action(record, ActionReason::DestroyRequested));
            }
        } else {
            let mut pending: HashMap<&Address, Pending> = HashMap::new();
            for address in &order {
                let Some(instance) = graph.get(address) else {
                    continue;
                };
                let record = snapshot.get(address);
                match self.decide(instance, record, &pending) {
                    Decision::Create(changes) => {
                        pending.insert(address, Pending::All);
                        creates_updates.push(apply_action(
                            ActionKind::Create,
                            instance,
                            changes,
                            ActionReason::New,
                        ));
                    }
                    Decision::Update(changes) => {
                        let names = changes.iter().map(|c| c.name.clone()).collect();
                        pending.insert(address, Pending::Attributes(names));
                        creates_updates.push(apply_action(
                            ActionKind::Update,
                            instance,
                            changes,
                            ActionReason::Changed,
                        ));
                    }
                    Decision::Replace(changes) => {
                        pending.insert(address, Pending::All);
                        if let Some(record) = record {
                            destroys.push(destroy_action(record, ActionReason::Replacement));
                        }
                        creates_updates.push(apply_action(
                            ActionKind::Create,
                            instance,
                            changes,
                            ActionReason::Replacement,
                        ));
                    }
                    Decision::NoOp => unchanged.push(address.clone()),
                }
            }

            for record in snapshot.records.values() {
                if !graph.contains(&record.address) {
                    destroys.push(destroy_action(record, ActionReason::Orphaned));
                }
            }
        }

        let mut candidates = order_destroys(destroys, &order, snapshot)?;
        candidates.extend(creates_updates);

        if !options.targets.is_empty() {
            let keep = targeted(&candidates, graph, snapshot, options);
            candidates.retain(|a| keep.contains(&(a.kind, a.address.clone())));
            unchanged.retain(|a| options.is_targeted(a));
        }

        let actions = sequence(candidates, graph, snapshot)?;
        log::debug!(
            "Planned {} actions, {} unchanged",
            actions.len(),
            unchanged.len()
        );

        Ok(Plan {
            actions,
            unchanged,
            state_fingerprint: snapshot.fingerprint()?,
            created_at: Utc::now(),
        })
    }

    /// Every record must map onto a type this run can interpret.
    fn validate_state(&self, graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<()> {
        for (key, record) in &snapshot.records {
            if *key != record.address {
                return Err(Error::StateCorruption(format!(
                    "record stored under {key} describes {}",
                    record.address
                )));
            }
            if record.address.resource_type != record.resource_type {
                return Err(Error::StateCorruption(format!(
                    "{} is recorded with type '{}'",
                    record.address, record.resource_type
                )));
            }
            if record.provider_id.is_empty() {
                return Err(Error::StateCorruption(format!(
                    "{} has no provider id",
                    record.address
                )));
            }
            if !graph.has_type(&record.resource_type) && !self.schema.knows(&record.resource_type) {
                return Err(Error::StateCorruption(format!(
                    "{} has type '{}', which is neither declared nor registered",
                    record.address, record.resource_type
                )));
            }
        }
        Ok(())
    }

    fn decide(
        &self,
        instance: &ResourceInstance,
        record: Option<&StateRecord>,
        pending: &HashMap<&Address, Pending>,
    ) -> Decision {
        let unknown = |attr: &Attr| {
            attr.references().iter().any(|r| match pending.get(&r.target) {
                Some(Pending::All) => true,
                Some(Pending::Attributes(names)) => names.contains(r.output_name()),
                None => false,
            })
        };

        let Some(record) = record else {
            let mut changes = diff::additions(&instance.attributes);
            for change in &mut changes {
                change.known_after_apply = change.after.as_ref().is_some_and(unknown);
            }
            return Decision::Create(changes);
        };

        let mut changes = diff::diff_attributes(&record.attributes, &instance.attributes);
        let changed: HashSet<String> = changes.iter().map(|c| c.name.clone()).collect();
        for (name, attr) in &instance.attributes {
            if !changed.contains(name) && unknown(attr) {
                changes.push(AttributeChange {
                    name: name.clone(),
                    before: record.attributes.get(name).cloned(),
                    after: Some(attr.clone()),
                    known_after_apply: true,
                    forces_replacement: false,
                });
            }
        }
        if changes.is_empty() {
            return Decision::NoOp;
        }

        changes.sort_by(|a, b| a.name.cmp(&b.name));
        for change in &mut changes {
            change.known_after_apply |= change.after.as_ref().is_some_and(unknown);
            change.forces_replacement = self
                .schema
                .requires_replacement(instance.resource_type(), &change.name);
        }

        if changes.iter().any(|c| c.forces_replacement) {
            Decision::Replace(changes)
        } else {
            Decision::Update(changes)
        }
    }
}

fn apply_action(
    kind: ActionKind,
    instance: &ResourceInstance,
    changes: Vec<AttributeChange>,
    reason: ActionReason,
) -> PlannedAction {
    PlannedAction {
        kind,
        address: instance.address.clone(),
        resource_type: instance.resource_type().to_string(),
        attributes: instance.attributes.clone(),
        changes,
        reason,
        dependencies: instance.dependencies.clone(),
        depends_on: Vec::new(),
    }
}

fn destroy_action(record: &StateRecord, reason: ActionReason) -> PlannedAction {
    PlannedAction {
        kind: ActionKind::Destroy,
        address: record.address.clone(),
        resource_type: record.resource_type.clone(),
        attributes: Attributes::new(),
        changes: diff::removals(&record.attributes),
        reason,
        dependencies: record.dependencies.clone(),
        depends_on: Vec::new(),
    }
}

/// Destroys in reverse deployed-dependency order: graph order first, then
/// orphans in address order, then reversed.
fn order_destroys(
    destroys: Vec<PlannedAction>,
    order: &[Address],
    snapshot: &StateSnapshot,
) -> Result<Vec<PlannedAction>> {
    let position: HashMap<&Address, usize> =
        order.iter().enumerate().map(|(i, a)| (a, i)).collect();
    let mut addresses: Vec<Address> = destroys.iter().map(|a| a.address.clone()).collect();
    addresses.sort_by_key(|a| (position.get(a).copied().unwrap_or(usize::MAX), a.clone()));

    let mut sorted = topological_order(&addresses, |a| {
        snapshot
            .get(a)
            .map(|r| r.dependencies.clone())
            .unwrap_or_default()
    })?;
    sorted.reverse();

    let mut by_address: HashMap<Address, PlannedAction> = destroys
        .into_iter()
        .map(|a| (a.address.clone(), a))
        .collect();
    Ok(sorted
        .iter()
        .filter_map(|a| by_address.remove(a))
        .collect())
}

/// (kind, address) pairs kept when planning with targets
fn targeted(
    candidates: &[PlannedAction],
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
    options: &PlanOptions,
) -> HashSet<(ActionKind, Address)> {
    let mut keep = HashSet::new();

    // Create/update: targets plus everything they depend on
    let mut required: HashSet<Address> = HashSet::new();
    let mut stack: Vec<Address> = graph
        .instances()
        .iter()
        .filter(|i| options.is_targeted(&i.address))
        .map(|i| i.address.clone())
        .collect();
    while let Some(address) = stack.pop() {
        if !required.insert(address.clone()) {
            continue;
        }
        if let Some(instance) = graph.get(&address) {
            stack.extend(instance.dependencies.iter().cloned());
        }
    }

    // Destroy: targets plus everything deployed on top of them
    let mut doomed: HashSet<Address> = HashSet::new();
    let mut stack: Vec<Address> = candidates
        .iter()
        .filter(|a| a.kind == ActionKind::Destroy && options.is_targeted(&a.address))
        .map(|a| a.address.clone())
        .collect();
    while let Some(address) = stack.pop() {
        if !doomed.insert(address.clone()) {
            continue;
        }
        stack.extend(
            snapshot
                .records
                .values()
                .filter(|r| r.dependencies.contains(&address))
                .map(|r| r.address.clone()),
        );
    }

    for action in candidates {
        let wanted = match action.kind {
            ActionKind::Destroy => {
                doomed.contains(&action.address)
                    || (action.is_replacement() && required.contains(&action.address))
            }
            ActionKind::Create | ActionKind::Update => {
                required.contains(&action.address) || doomed.contains(&action.address)
            }
        };
        if wanted {
            keep.insert((action.kind, action.address.clone()));
        }
    }
    keep
}

/// Sort candidates by the action graph and fill in `depends_on`.
fn sequence(
    candidates: Vec<PlannedAction>,
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
) -> Result<Vec<PlannedAction>> {
    let index: HashMap<(ActionKind, &Address), usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, a)| ((a.kind, &a.address), i))
        .collect();
    let find = |kind: ActionKind, address: &Address| index.get(&(kind, address)).copied();

    // Prerequisites of each candidate, by candidate position
    let mut prerequisites: Vec<Vec<usize>> = Vec::with_capacity(candidates.len());
    // (destroy, update): destroy after an instance detaches from it
    let mut detach_edges: Vec<(usize, usize)> = Vec::new();
    for (position, action) in candidates.iter().enumerate() {
        let mut before = Vec::new();
        match action.kind {
            ActionKind::Create | ActionKind::Update => {
                for dep in &action.dependencies {
                    before.extend(find(ActionKind::Create, dep));
                    before.extend(find(ActionKind::Update, dep));
                }
                if action.kind == ActionKind::Create {
                    before.extend(find(ActionKind::Destroy, &action.address));
                }
            }
            ActionKind::Destroy => {
                for record in snapshot.records.values() {
                    if !record.dependencies.contains(&action.address) {
                        continue;
                    }
                    before.extend(find(ActionKind::Destroy, &record.address));
                    // Instances that stay but stop referencing this one
                    let detaching = graph
                        .get(&record.address)
                        .is_some_and(|i| !i.dependencies.contains(&action.address));
                    if detaching && let Some(update) = find(ActionKind::Update, &record.address) {
                        detach_edges.push((position, update));
                    }
                }
            }
        }
        before.sort_unstable();
        before.dedup();
        prerequisites.push(before);
    }

    // A detach edge is dropped when the update already waits on the destroy,
    // e.g. the update re-points at something created after a replacement.
    for (destroy, update) in detach_edges {
        if requires(&prerequisites, update, destroy) {
            log::debug!(
                "Not ordering {} after {}: it would close a cycle",
                candidates[destroy].label(),
                candidates[update].label()
            );
            continue;
        }
        if let Err(at) = prerequisites[destroy].binary_search(&update) {
            prerequisites[destroy].insert(at, update);
        }
    }

    let labels: Vec<String> = candidates.iter().map(PlannedAction::label).collect();
    let position: HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let sorted = topological_order(&labels, |label| {
        position
            .get(label.as_str())
            .map(|&i| {
                prerequisites[i]
                    .iter()
                    .map(|&p| labels[p].clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(Vec::new)
    })?;

    // Candidate position -> final position
    let mut slot = vec![0; candidates.len()];
    for (final_pos, label) in sorted.iter().enumerate() {
        if let Some(&i) = position.get(label.as_str()) {
            slot[i] = final_pos;
        }
    }

    let mut actions: Vec<Option<PlannedAction>> = vec![None; candidates.len()];
    for (i, mut action) in candidates.into_iter().enumerate() {
        let mut depends_on: Vec<usize> = prerequisites[i].iter().map(|&p| slot[p]).collect();
        depends_on.sort_unstable();
        action.depends_on = depends_on;
        actions[slot[i]] = Some(action);
    }
    Ok(actions.into_iter().flatten().collect())
}

/// Whether action `from` transitively waits on action `to`
fn requires(prerequisites: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; prerequisites.len()];
    let mut stack = vec![from];
    while let Some(i) = stack.pop() {
        if i == to {
            return true;
        }
        if !std::mem::replace(&mut seen[i], true) {
            stack.extend(&prerequisites[i]);
        }
    }
    false
}
