//! Canonical store paths for the tally schema.
//!
//! This module is the **single source of truth** for all persisted key
//! paths. All writers must use these functions to construct paths. No
//! hardcoded path strings should exist outside this module.
//!
//! # Key Layout
//!
//! ```text
//! /v1/
//! ├── desired/{process_guid}               encoded DesiredLrp
//! ├── actual/{process_guid}/{instance_guid} encoded ActualLrp
//! ├── executor/{executor_id}               empty value, TTL = presence interval
//! ├── task/
//! │   ├── pending/{guid}                   encoded Task
//! │   ├── claimed/{guid}                   encoded Task, TTL = claim TTL
//! │   ├── running/{guid}                   encoded Task
//! │   └── completed/{guid}                 encoded Task
//! └── locks/
//!     └── task_convergence                 lock claim, TTL = caller-supplied
//! ```

use crate::error::{Error, Result};

/// Versioned root prefix for all persisted keys.
pub const SCHEMA_ROOT: &str = "/v1";

/// Root of the desired-LRP subtree.
pub const DESIRED_ROOT: &str = "/v1/desired";

/// Root of the actual-LRP subtree.
pub const ACTUAL_ROOT: &str = "/v1/actual";

/// Root of the executor presence subtree.
pub const EXECUTOR_ROOT: &str = "/v1/executor";

/// Root of the task subtree.
pub const TASK_ROOT: &str = "/v1/task";

/// Advisory lock key for task convergence.
pub const TASK_CONVERGENCE_LOCK: &str = "/v1/locks/task_convergence";

/// The four task state subtrees.
///
/// A task exists under exactly one state key at any moment; convergence
/// restores that invariant when flows are abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStateTag {
    /// Authored by the scheduler; awaiting a claim.
    Pending,
    /// Claimed by an executor; TTL-bounded.
    Claimed,
    /// Running inside a container.
    Running,
    /// Terminal; awaiting resolution.
    Completed,
}

impl TaskStateTag {
    /// Returns the string name for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    /// Returns all task states.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Pending, Self::Claimed, Self::Running, Self::Completed]
    }

    /// Returns the subtree root for this state.
    #[must_use]
    pub fn root(&self) -> String {
        format!("{TASK_ROOT}/{}", self.as_str())
    }
}

impl std::fmt::Display for TaskStateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns the key for a desired LRP.
pub fn desired_lrp(process_guid: &str) -> Result<String> {
    require(process_guid, "process guid")?;
    Ok(format!("{DESIRED_ROOT}/{process_guid}"))
}

/// Returns the directory holding all actuals for a process guid.
pub fn actual_lrp_dir(process_guid: &str) -> Result<String> {
    require(process_guid, "process guid")?;
    Ok(format!("{ACTUAL_ROOT}/{process_guid}"))
}

/// Returns the key for an actual LRP instance.
pub fn actual_lrp(process_guid: &str, instance_guid: &str) -> Result<String> {
    require(process_guid, "process guid")?;
    require(instance_guid, "instance guid")?;
    Ok(format!("{ACTUAL_ROOT}/{process_guid}/{instance_guid}"))
}

/// Returns the presence key for an executor.
pub fn executor(executor_id: &str) -> Result<String> {
    require(executor_id, "executor id")?;
    Ok(format!("{EXECUTOR_ROOT}/{executor_id}"))
}

/// Returns the key for a task in the given state.
pub fn task(state: TaskStateTag, guid: &str) -> Result<String> {
    require(guid, "task guid")?;
    Ok(format!("{}/{guid}", state.root()))
}

/// Returns the final path segment of a key (the entity identifier).
#[must_use]
pub fn leaf(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn require(identifier: &str, what: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(Error::programmer(format!(
            "cannot build path from empty {what}"
        )));
    }
    Ok(())
}
