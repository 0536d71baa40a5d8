//! Task state-transition writers and accessors.
//!
//! Each writer validates, then mutates exactly one state key. Store
//! mutations retry indefinitely on transient unavailability with capped
//! backoff; caller errors abort immediately and are never retried.

use tally_core::{codec, schema, schema::TaskStateTag, Error, Result, SwapResult};

use crate::coordinator::Coordinator;
use crate::fanout;
use crate::models::Task;

impl Coordinator {
    /// Writes (or overwrites) the pending entry for a task. Idempotent.
    pub async fn desire_task(&self, task: &Task) -> Result<()> {
        let key = schema::task(TaskStateTag::Pending, &task.guid)?;
        let value = codec::encode(task)?;

        let store = &self.store;
        let key = &key;
        self.retry_transient("desire_task", move || {
            let value = value.clone();
            async move { store.set(key, value, None).await.map(|_| ()) }
        })
        .await
    }

    /// Claims a task for an executor: an atomic, TTL-bounded create of the
    /// claimed entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingExecutorId`] when the task names no
    /// executor, and [`Error::ResourceBusy`] when the task is already
    /// claimed.
    pub async fn claim_task(&self, task: &Task) -> Result<()> {
        if task.executor_id.is_empty() {
            return Err(Error::MissingExecutorId);
        }
        let key = schema::task(TaskStateTag::Claimed, &task.guid)?;
        let value = codec::encode(task)?;
        let ttl = self.config.task_claim_ttl;

        let store = &self.store;
        let key_ref = &key;
        let result = self
            .retry_transient("claim_task", move || {
                let value = value.clone();
                async move { store.create_if_absent(key_ref, value, Some(ttl)).await }
            })
            .await?;

        match result {
            SwapResult::Swapped { .. } => Ok(()),
            SwapResult::Conflict { .. } => {
                Err(Error::busy(format!("task already claimed: {}", task.guid)))
            }
        }
    }

    /// Records that a claimed task is now running in a container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingExecutorId`] or
    /// [`Error::MissingContainerHandle`] when those fields are absent.
    pub async fn start_task(&self, task: &Task) -> Result<()> {
        if task.executor_id.is_empty() {
            return Err(Error::MissingExecutorId);
        }
        if task.container_handle.is_empty() {
            return Err(Error::MissingContainerHandle);
        }
        let key = schema::task(TaskStateTag::Running, &task.guid)?;
        let value = codec::encode(task)?;

        let store = &self.store;
        let key = &key;
        self.retry_transient("start_task", move || {
            let value = value.clone();
            async move { store.set(key, value, None).await.map(|_| ()) }
        })
        .await
    }

    /// Records the terminal outcome of a task. The caller sets `failed`
    /// and `failure_reason` before completing.
    pub async fn complete_task(&self, task: &Task) -> Result<()> {
        let key = schema::task(TaskStateTag::Completed, &task.guid)?;
        let value = codec::encode(task)?;

        let store = &self.store;
        let key = &key;
        self.retry_transient("complete_task", move || {
            let value = value.clone();
            async move { store.set(key, value, None).await.map(|_| ()) }
        })
        .await
    }

    /// Acknowledges a completed task by removing its pending entry; the
    /// next convergence pass garbage-collects the remaining state keys.
    pub async fn resolve_task(&self, task: &Task) -> Result<()> {
        let key = schema::task(TaskStateTag::Pending, &task.guid)?;

        let store = &self.store;
        let key = &key;
        self.retry_transient("resolve_task", move || async move {
            store.delete(key).await
        })
        .await
    }

    /// Returns every task currently under the given state subtree.
    pub async fn tasks_in_state(&self, state: TaskStateTag) -> Result<Vec<Task>> {
        fanout::hydrate(
            self.store.as_ref(),
            &state.root(),
            self.config.fanout_width,
        )
        .await
    }
}
