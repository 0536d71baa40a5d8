//! Task convergence: restore the one-state-key-per-task invariant.
//!
//! For every guid observed across the four state subtrees:
//!
//! - pending + claimed/running coexist: the flow is in flight, leave it
//!   alone. If completed also exists, kick it to prompt the resolver.
//! - pending alone: kick it to prompt the scheduler.
//! - no pending: the flow was abandoned; delete whatever state survives.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn, Instrument};

use tally_core::{observability, schema, schema::TaskStateTag, Result, StoreNode};

use crate::coordinator::Coordinator;

impl Coordinator {
    /// Runs one task convergence pass.
    ///
    /// A transient load failure aborts the pass without mutation.
    pub async fn converge_tasks(&self) -> Result<()> {
        let span = observability::convergence_span("tasks");
        async { self.converge_tasks_pass().await }
            .instrument(span)
            .await
    }

    async fn converge_tasks_pass(&self) -> Result<()> {
        let mut by_state: HashMap<TaskStateTag, HashMap<String, StoreNode>> = HashMap::new();
        for state in TaskStateTag::all() {
            let nodes = self.store.list_recursively(&state.root()).await?;
            by_state.insert(
                *state,
                nodes
                    .into_iter()
                    .map(|node| (schema::leaf(&node.key).to_string(), node))
                    .collect(),
            );
        }

        let guids: HashSet<String> = by_state
            .values()
            .flat_map(|entries| entries.keys().cloned())
            .collect();

        for guid in guids {
            let entry = |state: TaskStateTag| by_state.get(&state).and_then(|m| m.get(&guid));
            let pending = entry(TaskStateTag::Pending);
            let claimed = entry(TaskStateTag::Claimed);
            let running = entry(TaskStateTag::Running);
            let completed = entry(TaskStateTag::Completed);

            if let Some(pending_node) = pending {
                if let Some(completed_node) = completed {
                    self.kick_task_entry(completed_node).await;
                } else if claimed.is_none() && running.is_none() {
                    self.kick_task_entry(pending_node).await;
                }
                // Claimed or running exists: the task is in flight.
            } else {
                for node in [claimed, running, completed].into_iter().flatten() {
                    debug!(key = %node.key, "removing task state left by an abandoned flow");
                    if let Err(error) = self.store.delete(&node.key).await {
                        warn!(key = %node.key, error = %error, "failed to delete abandoned task entry");
                    }
                }
            }
        }

        Ok(())
    }

    async fn kick_task_entry(&self, node: &StoreNode) {
        match super::kick(self.store.as_ref(), &node.key, node.version, node.value.clone()).await {
            Ok(true) => debug!(key = %node.key, "kicked task entry"),
            Ok(false) => debug!(key = %node.key, "skipping kick; task entry changed during convergence"),
            Err(error) => warn!(key = %node.key, error = %error, "failed to kick task entry"),
        }
    }
}
