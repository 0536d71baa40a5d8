//! Advisory mutual exclusion for the task converger.
//!
//! A single well-known TTL key keeps replicated convergers from running
//! simultaneously. No fencing tokens: convergence is idempotent, so a
//! second converger wastes work but never corrupts state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use tally_core::{codec, schema, Result, SwapResult};

use crate::coordinator::Coordinator;

/// Diagnostic contents of the convergence lock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockClaim {
    /// Unique id of the holder.
    pub holder_id: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockClaim {
    fn new() -> Self {
        Self {
            holder_id: Ulid::new().to_string(),
            acquired_at: Utc::now(),
        }
    }
}

impl Coordinator {
    /// Attempts to take the task-convergence lock for `ttl`.
    ///
    /// Returns `true` on acquisition, `false` when another holder has it.
    /// The lock is never explicitly released; it lapses with its TTL.
    pub async fn grab_task_convergence_lock(&self, ttl: Duration) -> Result<bool> {
        let value = codec::encode(&LockClaim::new())?;
        let result = self
            .store
            .create_if_absent(schema::TASK_CONVERGENCE_LOCK, value, Some(ttl))
            .await?;
        Ok(matches!(result, SwapResult::Swapped { .. }))
    }
}
