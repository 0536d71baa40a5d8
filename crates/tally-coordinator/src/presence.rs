//! Executor liveness presence.
//!
//! An executor advertises liveness by holding a TTL key under the
//! executor root. Absence of the key means the executor is presumed dead
//! and convergence prunes its actuals.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use tally_core::{maintain_node, schema, NodeMaintainer, Result};

use crate::coordinator::Coordinator;
use crate::models::ExecutorPresence;

/// Handle to a maintained presence key.
///
/// Stopping ceases renewals; the key is left to expire naturally.
pub struct PresenceGuard {
    executor_id: String,
    maintainer: NodeMaintainer,
}

impl PresenceGuard {
    /// Returns the executor whose presence is maintained.
    #[must_use]
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Stops renewing the presence key and waits for the refresher to
    /// exit.
    pub async fn stop(self) {
        self.maintainer.stop().await;
    }
}

impl Coordinator {
    /// Starts advertising liveness for an executor.
    ///
    /// Writes an empty-value key with TTL = `interval` and refreshes it at
    /// half that cadence until the returned guard is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`tally_core::Error::ResourceBusy`] promptly when the key
    /// is already held by another holder.
    pub async fn maintain_presence(
        &self,
        interval: Duration,
        executor_id: &str,
    ) -> Result<PresenceGuard> {
        let key = schema::executor(executor_id)?;
        let maintainer =
            maintain_node(Arc::clone(&self.store), key, Bytes::new(), interval).await?;
        Ok(PresenceGuard {
            executor_id: executor_id.to_string(),
            maintainer,
        })
    }

    /// Returns the executors currently advertising liveness.
    pub async fn executor_presences(&self) -> Result<Vec<ExecutorPresence>> {
        let nodes = self.store.list_recursively(schema::EXECUTOR_ROOT).await?;
        Ok(nodes
            .into_iter()
            .map(|node| ExecutorPresence {
                executor_id: schema::leaf(&node.key).to_string(),
            })
            .collect())
    }
}
