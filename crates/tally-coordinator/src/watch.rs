//! Typed change streams over the store's raw watch events.
//!
//! Each watcher runs one background pump translating raw subtree events
//! into domain values. Within a stream, store event order is preserved;
//! ordering across subtrees is unspecified.
//!
//! Deletion handling differs by family: desired-LRP subscribers see
//! deletes (a change with only `before`), task subscribers do not.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

use tally_core::{
    codec, observability, schema, schema::TaskStateTag, Result, StoreNode, WatchEvent,
    WatchEventKind,
};

use crate::coordinator::Coordinator;
use crate::models::{DesiredLrp, DesiredLrpChange, Task};

/// Handle to a running watcher pump.
///
/// Stopping closes the events channel promptly and detaches the
/// underlying store subscription. Dropping the handle aborts the pump.
pub struct WatcherHandle {
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stops the pump and waits for it to exit.
    pub async fn stop(mut self) {
        self.stop.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Coordinator {
    /// Subscribes to changes of desired LRPs.
    ///
    /// Every create, update (kicks included), and delete is reported;
    /// either side of the change may be absent.
    pub async fn watch_for_desired_lrp_changes(
        &self,
    ) -> Result<(mpsc::UnboundedReceiver<DesiredLrpChange>, WatcherHandle)> {
        self.spawn_watch(schema::DESIRED_ROOT, |event| {
            let before = decode_side(event.before.as_ref());
            let after = decode_side(event.after.as_ref());
            if before.is_none() && after.is_none() {
                return None;
            }
            Some(DesiredLrpChange { before, after })
        })
        .await
    }

    /// Subscribes to tasks arriving in (or re-kicked into) the pending
    /// subtree. Deletes are silently dropped.
    pub async fn watch_for_desired_task(
        &self,
    ) -> Result<(mpsc::UnboundedReceiver<Task>, WatcherHandle)> {
        self.watch_task_subtree(TaskStateTag::Pending).await
    }

    /// Subscribes to tasks arriving in (or re-kicked into) the completed
    /// subtree. Deletes are silently dropped.
    pub async fn watch_for_completed_task(
        &self,
    ) -> Result<(mpsc::UnboundedReceiver<Task>, WatcherHandle)> {
        self.watch_task_subtree(TaskStateTag::Completed).await
    }

    async fn watch_task_subtree(
        &self,
        state: TaskStateTag,
    ) -> Result<(mpsc::UnboundedReceiver<Task>, WatcherHandle)> {
        self.spawn_watch(&state.root(), |event| {
            if event.kind == WatchEventKind::Delete {
                return None;
            }
            let node = event.after.as_ref()?;
            match codec::decode::<Task>(&node.key, &node.value) {
                Ok(task) => Some(task),
                Err(error) => {
                    warn!(key = %node.key, error = %error, "dropping malformed task event");
                    None
                }
            }
        })
        .await
    }

    async fn spawn_watch<Out, F>(
        &self,
        prefix: &str,
        translate: F,
    ) -> Result<(mpsc::UnboundedReceiver<Out>, WatcherHandle)>
    where
        Out: Send + 'static,
        F: Fn(WatchEvent) -> Option<Out> + Send + 'static,
    {
        let mut raw = self.store.watch(prefix).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        let stop_signal = Arc::clone(&stop);

        let pump = async move {
            loop {
                tokio::select! {
                    biased;

                    () = stop_signal.notified() => break,

                    event = raw.recv() => {
                        let Some(event) = event else { break };
                        if let Some(typed) = translate(event) {
                            if events_tx.send(typed).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        };
        let task = tokio::spawn(pump.instrument(observability::watcher_span(prefix)));

        Ok((
            events_rx,
            WatcherHandle {
                stop,
                task: Some(task),
            },
        ))
    }
}

fn decode_side(node: Option<&StoreNode>) -> Option<DesiredLrp> {
    let node = node?;
    match codec::decode(&node.key, &node.value) {
        Ok(lrp) => Some(lrp),
        Err(error) => {
            warn!(key = %node.key, error = %error, "dropping malformed desired payload from change event");
            None
        }
    }
}
