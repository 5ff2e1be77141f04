//! Apply executor - runs a plan against a provider and a state store
//!
//! A single coordinator (the calling thread) owns the state store. It hands
//! ready actions to a bounded rayon pool and receives completions over a
//! channel. State is written for each completed action before any of its
//! dependents is dispatched.

use crate::context::{CancelToken, Created, ProgressCallback, Provider};
use crate::error::{Error, ProviderError, Result};
use crate::planner::{ActionKind, Plan, PlannedAction};
use crate::state::{StateRecord, StateStore};
use crate::types::{
    ActionStatus, Address, ApplyOutcome, Attr, ExecuteOptions, ExecuteSummary, Reference, Value,
    Values,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::mpsc;
use std::time::Duration;

/// How often the coordinator wakes up to look at the cancel token
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Final status of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub kind: ActionKind,
    pub address: Address,
    #[serde(flatten)]
    pub status: ActionStatus,
}

/// Result of an apply run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    /// One entry per plan action, in plan order
    pub actions: Vec<ActionReport>,
    pub summary: ExecuteSummary,
}

impl ApplyReport {
    /// Status of the action for `address` (the last one, for replacements)
    pub fn status_of(&self, address: &Address) -> Option<&ActionStatus> {
        self.actions
            .iter()
            .rev()
            .find(|a| &a.address == address)
            .map(|a| &a.status)
    }

    /// Actions that failed, with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&Address, &str)> {
        self.actions.iter().filter_map(|a| match &a.status {
            ActionStatus::Failed { error }
            | ActionStatus::InFlightAtCancel { error: Some(error) } => {
                Some((&a.address, error.as_str()))
            }
            _ => None,
        })
    }

    /// Actions skipped because a prerequisite failed
    pub fn skipped(&self) -> impl Iterator<Item = (&Address, &Address)> {
        self.actions.iter().filter_map(|a| match &a.status {
            ActionStatus::Skipped { blocked_by } => Some((&a.address, blocked_by)),
            _ => None,
        })
    }
}

/// Provider call prepared on the coordinator, run on a worker
enum Job {
    Create {
        resource_type: String,
        attributes: Values,
    },
    Update {
        resource_type: String,
        provider_id: String,
        changed: Values,
    },
    Destroy {
        resource_type: String,
        provider_id: String,
    },
}

enum JobOutput {
    Created(Created),
    Updated(Values),
    Destroyed,
}

impl Job {
    fn run(&self, provider: &dyn Provider) -> std::result::Result<JobOutput, ProviderError> {
        match self {
            Self::Create {
                resource_type,
                attributes,
            } => provider
                .create(resource_type, attributes)
                .map(JobOutput::Created),
            Self::Update {
                resource_type,
                provider_id,
                changed,
            } => provider
                .update(resource_type, provider_id, changed)
                .map(JobOutput::Updated),
            Self::Destroy {
                resource_type,
                provider_id,
            } => provider
                .destroy(resource_type, provider_id)
                .map(|()| JobOutput::Destroyed),
        }
    }
}

/// Execute a plan.
///
/// Provider failures never abort the run: the failed instance is recorded
/// as `Failed`, its transitive dependents as `Skipped`, and unrelated
/// branches continue. Already-applied actions are never rolled back.
///
/// # Errors
/// Only for plans with inconsistent prerequisites or when the worker pool
/// cannot be started; nothing has been applied in that case.
pub fn apply<S, P>(
    plan: &Plan,
    provider: &dyn Provider,
    store: &mut S,
    options: &ExecuteOptions,
    cancel: &CancelToken,
    progress: &mut P,
) -> Result<ApplyReport>
where
    S: StateStore + ?Sized,
    P: ProgressCallback + ?Sized,
{
    let n = plan.actions.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut waiting: Vec<usize> = vec![0; n];
    for (i, action) in plan.actions.iter().enumerate() {
        for &dep in &action.depends_on {
            if dep >= i {
                return Err(Error::InvalidPlan(format!(
                    "action {i} ({}) waits for action {dep}, which does not precede it",
                    action.label()
                )));
            }
            dependents[dep].push(i);
            waiting[i] += 1;
        }
    }

    let jobs = options.jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("apply-worker-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    let mut run = Run {
        plan,
        statuses: vec![None; n],
        dependents,
        waiting,
        ready: (0..n).filter(|&i| plan.actions[i].depends_on.is_empty()).collect(),
    };

    log::info!("Applying {n} actions with {jobs} workers");

    let (tx, rx) = mpsc::channel::<(usize, std::result::Result<JobOutput, ProviderError>)>();
    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while in_flight < jobs && !cancel.is_cancelled() {
                let Some(i) = run.ready.pop_first() else {
                    break;
                };
                let action = &plan.actions[i];
                match prepare(action, &*store) {
                    Ok(job) => {
                        log::debug!("Dispatching {}", action.label());
                        progress.on_action_start(action);
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let result = job.run(provider);
                            // Receiver outlives the scope
                            let _ = tx.send((i, result));
                        });
                        in_flight += 1;
                    }
                    Err(error) => {
                        progress.on_action_start(action);
                        run.fail(i, ActionStatus::Failed { error }, progress);
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            match rx.recv_timeout(CANCEL_POLL) {
                Ok((i, result)) => {
                    in_flight -= 1;
                    let status = complete(&plan.actions[i], result, &mut *store, cancel);
                    if status.is_success() {
                        run.succeed(i, status, progress);
                    } else {
                        run.fail(i, status, progress);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    if cancel.is_cancelled() {
        log::warn!("Apply cancelled; in-flight actions were allowed to finish");
    }

    Ok(run.report())
}

/// Coordinator bookkeeping
struct Run<'a> {
    plan: &'a Plan,
    statuses: Vec<Option<ActionStatus>>,
    dependents: Vec<Vec<usize>>,
    waiting: Vec<usize>,
    /// Ready actions, dispatched in plan order
    ready: BTreeSet<usize>,
}

impl Run<'_> {
    fn succeed<P: ProgressCallback + ?Sized>(
        &mut self,
        i: usize,
        status: ActionStatus,
        progress: &mut P,
    ) {
        let action = &self.plan.actions[i];
        log::info!("{}: done", action.label());
        progress.on_action_complete(action, &status);
        self.statuses[i] = Some(status);

        for &d in &self.dependents[i] {
            self.waiting[d] -= 1;
            if self.waiting[d] == 0 && self.statuses[d].is_none() {
                self.ready.insert(d);
            }
        }
    }

    fn fail<P: ProgressCallback + ?Sized>(
        &mut self,
        i: usize,
        status: ActionStatus,
        progress: &mut P,
    ) {
        let action = &self.plan.actions[i];
        if let ActionStatus::Failed { error }
        | ActionStatus::InFlightAtCancel { error: Some(error) } = &status
        {
            log::warn!("{}: {error}", action.label());
        }
        progress.on_action_complete(action, &status);
        self.statuses[i] = Some(status);

        // Everything downstream is blocked by this instance
        let blocked_by = action.address.clone();
        let mut queue: VecDeque<usize> = self.dependents[i].iter().copied().collect();
        while let Some(d) = queue.pop_front() {
            if self.statuses[d].is_some() {
                continue;
            }
            let skipped = ActionStatus::Skipped {
                blocked_by: blocked_by.clone(),
            };
            log::info!("{}: skipped", self.plan.actions[d].label());
            progress.on_action_complete(&self.plan.actions[d], &skipped);
            self.statuses[d] = Some(skipped);
            self.ready.remove(&d);
            queue.extend(self.dependents[d].iter().copied());
        }
    }

    fn report(self) -> ApplyReport {
        let mut summary = ExecuteSummary::default();
        let mut actions = Vec::with_capacity(self.statuses.len());
        for (action, status) in self.plan.actions.iter().zip(self.statuses) {
            let status = status.unwrap_or(ActionStatus::NotStarted);
            match &status {
                s if s.is_success() => match action.kind {
                    ActionKind::Create => summary.created += 1,
                    ActionKind::Update => summary.updated += 1,
                    ActionKind::Destroy => summary.destroyed += 1,
                },
                ActionStatus::Skipped { .. } => summary.skipped += 1,
                ActionStatus::NotStarted => summary.not_started += 1,
                _ => summary.failed += 1,
            }
            actions.push(ActionReport {
                kind: action.kind,
                address: action.address.clone(),
                status,
            });
        }

        let interrupted = actions.iter().any(|a| {
            matches!(
                a.status,
                ActionStatus::NotStarted | ActionStatus::InFlightAtCancel { .. }
            )
        });
        let outcome = if interrupted {
            ApplyOutcome::Cancelled
        } else if summary.is_success() {
            ApplyOutcome::Applied
        } else if summary.total_changes() == 0 {
            ApplyOutcome::Failed
        } else {
            ApplyOutcome::PartiallyApplied
        };

        ApplyReport {
            outcome,
            actions,
            summary,
        }
    }
}

/// Resolve an action's inputs from the state store.
fn prepare<S: StateStore + ?Sized>(
    action: &PlannedAction,
    store: &S,
) -> std::result::Result<Job, String> {
    match action.kind {
        ActionKind::Create => {
            let attributes = action
                .attributes
                .iter()
                .map(|(name, attr)| resolve(attr, store).map(|v| (name.clone(), v)))
                .collect::<std::result::Result<Values, String>>()?;
            Ok(Job::Create {
                resource_type: action.resource_type.clone(),
                attributes,
            })
        }
        ActionKind::Update => {
            let record = recorded(action, store)?;
            let changed = action
                .changed_attributes()
                .into_iter()
                .map(|(name, after)| {
                    let value = match after {
                        Some(attr) => resolve(attr, store)?,
                        None => Value::Null,
                    };
                    Ok::<_, String>((name.to_string(), value))
                })
                .collect::<std::result::Result<Values, String>>()?;
            Ok(Job::Update {
                resource_type: action.resource_type.clone(),
                provider_id: record.provider_id,
                changed,
            })
        }
        ActionKind::Destroy => {
            let record = recorded(action, store)?;
            Ok(Job::Destroy {
                resource_type: action.resource_type.clone(),
                provider_id: record.provider_id,
            })
        }
    }
}

fn recorded<S: StateStore + ?Sized>(
    action: &PlannedAction,
    store: &S,
) -> std::result::Result<StateRecord, String> {
    store
        .get(&action.address)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no state record for {}", action.address))
}

fn resolve<S: StateStore + ?Sized>(attr: &Attr, store: &S) -> std::result::Result<Value, String> {
    let mut records: HashMap<&Address, StateRecord> = HashMap::new();
    for reference in attr.references() {
        if records.contains_key(&reference.target) {
            continue;
        }
        match store.get(&reference.target) {
            Ok(Some(record)) => {
                records.insert(&reference.target, record);
            }
            Ok(None) => return Err(format!("{} has not been created", reference.target)),
            Err(e) => return Err(e.to_string()),
        }
    }
    attr.resolve(&|r: &Reference| records.get(&r.target).and_then(|rec| rec.output(r.output_name())))
        .map_err(|r| format!("{} has no output '{}'", r.target, r.output_name()))
}

/// Write state for a completed provider call and compute the final status.
fn complete<S: StateStore + ?Sized>(
    action: &PlannedAction,
    result: std::result::Result<JobOutput, ProviderError>,
    store: &mut S,
    cancel: &CancelToken,
) -> ActionStatus {
    let outcome = result
        .map_err(|e| e.to_string())
        .and_then(|output| record(action, output, store));

    match (outcome, cancel.is_cancelled()) {
        (Ok(()), false) => ActionStatus::Applied,
        (Ok(()), true) => ActionStatus::InFlightAtCancel { error: None },
        (Err(error), false) => ActionStatus::Failed { error },
        (Err(error), true) => ActionStatus::InFlightAtCancel { error: Some(error) },
    }
}

fn record<S: StateStore + ?Sized>(
    action: &PlannedAction,
    output: JobOutput,
    store: &mut S,
) -> std::result::Result<(), String> {
    let written = match output {
        JobOutput::Created(created) => store.put(StateRecord {
            address: action.address.clone(),
            resource_type: action.resource_type.clone(),
            provider_id: created.provider_id,
            attributes: action.attributes.clone(),
            outputs: created.outputs,
            dependencies: action.dependencies.clone(),
            updated_at: Utc::now(),
        }),
        JobOutput::Updated(outputs) => {
            let mut record = recorded(action, &*store)?;
            record.outputs.extend(outputs);
            record.attributes = action.attributes.clone();
            record.dependencies = action.dependencies.clone();
            record.updated_at = Utc::now();
            store.put(record)
        }
        JobOutput::Destroyed => store.delete(&action.address),
    };
    written.map_err(|e| {
        log::error!("{}: provider call succeeded but state was not written", action.label());
        format!("failed to write state: {e}")
    })
}
