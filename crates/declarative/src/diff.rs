//! Attribute diff computation

use crate::planner::{ActionKind, Plan, PlannedAction};
use crate::types::{Attr, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A change to one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name
    pub name: String,
    /// Value before (absent for additions)
    pub before: Option<Attr>,
    /// Value after (absent for removals)
    pub after: Option<Attr>,
    /// Value depends on an output that only exists after apply
    #[serde(default)]
    pub known_after_apply: bool,
    /// Changing this attribute forces replacement
    #[serde(default)]
    pub forces_replacement: bool,
}

impl AttributeChange {
    /// Check if this change adds the attribute
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    /// Check if this change removes the attribute
    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// Diff two attribute maps, in attribute name order.
///
/// Only structural differences are reported here; the planner adds
/// "known after apply" changes on top.
pub fn diff_attributes(before: &Attributes, after: &Attributes) -> Vec<AttributeChange> {
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name);
            let new = after.get(name);
            if old == new {
                return None;
            }
            Some(AttributeChange {
                name: name.clone(),
                before: old.cloned(),
                after: new.cloned(),
                known_after_apply: false,
                forces_replacement: false,
            })
        })
        .collect()
}

/// Every attribute as an addition (Create)
pub fn additions(after: &Attributes) -> Vec<AttributeChange> {
    diff_attributes(&Attributes::new(), after)
}

/// Every attribute as a removal (Destroy)
pub fn removals(before: &Attributes) -> Vec<AttributeChange> {
    diff_attributes(before, &Attributes::new())
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Instances to create (not counting replacements)
    pub additions: usize,
    /// Instances to destroy (not counting replacements)
    pub removals: usize,
    /// Instances to update in place
    pub modifications: usize,
    /// Instances to destroy and re-create
    pub replacements: usize,
}

impl DiffSummary {
    /// Create a summary from a plan
    pub fn from_plan(plan: &Plan) -> Self {
        let replaced: BTreeSet<_> = plan
            .actions
            .iter()
            .filter(|a| a.is_replacement())
            .map(|a| &a.address)
            .collect();

        let mut summary = Self {
            replacements: replaced.len(),
            ..Self::default()
        };
        for action in &plan.actions {
            if replaced.contains(&action.address) {
                continue;
            }
            match action.kind {
                ActionKind::Create => summary.additions += 1,
                ActionKind::Update => summary.modifications += 1,
                ActionKind::Destroy => summary.removals += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group actions by resource type
pub fn group_by_type(actions: &[PlannedAction]) -> BTreeMap<&str, Vec<&PlannedAction>> {
    let mut groups: BTreeMap<&str, Vec<&PlannedAction>> = BTreeMap::new();
    for action in actions {
        groups
            .entry(action.address.resource_type.as_str())
            .or_default()
            .push(action);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Attr::Value(Value::from(*v))))
            .collect()
    }

    #[test]
    fn test_diff_reports_only_changes() {
        let before = attrs(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let after = attrs(&[("a", "1"), ("b", "20"), ("d", "4")]);
        let changes = diff_attributes(&before, &after);
        let names: Vec<_> = changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
        assert!(changes[1].is_removal());
        assert!(changes[2].is_addition());
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let a = attrs(&[("a", "1")]);
        assert!(diff_attributes(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_additions_and_removals() {
        let a = attrs(&[("x", "1"), ("y", "2")]);
        assert!(additions(&a).iter().all(AttributeChange::is_addition));
        assert!(removals(&a).iter().all(AttributeChange::is_removal));
    }
}
