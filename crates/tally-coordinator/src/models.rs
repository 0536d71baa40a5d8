//! Domain records persisted under the tally schema.
//!
//! All records round-trip through `tally_core::codec`; equality after a
//! decode of an encode is part of their contract.

use serde::{Deserialize, Serialize};

/// Scheduler-authored declaration of a replicated workload.
///
/// At most one desired LRP exists per `process_guid`. The record is
/// created by `desire_lrp`, rewritten by scheduler updates or a
/// convergence kick (an identity compare-and-swap that wakes watchers),
/// and destroyed by explicit removal or convergence purging of malformed
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLrp {
    /// Unique process identifier; the join key to actual instances.
    pub process_guid: String,
    /// Grouping tag for scheduler-scoped queries.
    pub domain: String,
    /// Number of instances that should be running.
    pub instances: u32,
    /// Placement constraint.
    pub stack: String,
    /// Opaque scheduler payload describing what each instance runs.
    pub actions: serde_json::Value,
}

/// The runtime state of an actual LRP instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrpInstanceState {
    /// The executor has accepted the instance and is bringing it up.
    Starting,
    /// The instance is up.
    Running,
}

/// Executor-authored record of one running (or starting) instance.
///
/// For a healthy desired LRP with `instances = N`, exactly one actual
/// exists per index in `[0, N)`, each bound to a live executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrp {
    /// Process this instance belongs to.
    pub process_guid: String,
    /// Unique instance identifier.
    pub instance_guid: String,
    /// Executor hosting the instance.
    pub executor_id: String,
    /// Instance index, conventionally below the desired instance count.
    pub index: u32,
    /// Runtime state.
    pub state: LrpInstanceState,
}

/// A one-shot workload progressing pending → claimed → running → completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub guid: String,
    /// Executor that claimed the task; empty until claimed.
    #[serde(default)]
    pub executor_id: String,
    /// Container the task runs in; empty until started.
    #[serde(default)]
    pub container_handle: String,
    /// Whether the task failed.
    #[serde(default)]
    pub failed: bool,
    /// Failure description when `failed` is set.
    #[serde(default)]
    pub failure_reason: String,
}

impl Task {
    /// Creates a task with the given guid and no execution state.
    #[must_use]
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            executor_id: String::new(),
            container_handle: String::new(),
            failed: false,
            failure_reason: String::new(),
        }
    }
}

/// A live executor, named by its presence key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorPresence {
    /// The executor's identifier.
    pub executor_id: String,
}

/// Directive to stop an actual instance that no desired LRP owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StopLrpInstance {
    /// Process the orphan claims to belong to.
    pub process_guid: String,
    /// Instance to stop.
    pub instance_guid: String,
    /// Index the orphan reported.
    pub index: u32,
}

/// A change observed on the desired-LRP subtree.
///
/// Either side may be absent: creates carry only `after`, deletes only
/// `before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLrpChange {
    /// The record before the change, when decodable.
    pub before: Option<DesiredLrp>,
    /// The record after the change, when decodable.
    pub after: Option<DesiredLrp>,
}
