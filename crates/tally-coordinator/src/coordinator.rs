//! The coordinator façade.
//!
//! One [`Coordinator`] wires a store, a configuration, and a metrics sink
//! together; every writer, accessor, watcher, presence, lock, and
//! convergence operation hangs off it. The implementations live in their
//! own modules as additional `impl` blocks.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::warn;

use tally_core::{Result, Store};

use crate::config::CoordinatorConfig;
use crate::metrics::{FacadeSink, MetricsSink};
use crate::models::StopLrpInstance;

/// Library-level entry point for schedulers, executor agents, and
/// convergers.
pub struct Coordinator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: CoordinatorConfig,
    pub(crate) sink: Arc<dyn MetricsSink>,
    stops_tx: mpsc::UnboundedSender<StopLrpInstance>,
    stops_rx: Mutex<Option<mpsc::UnboundedReceiver<StopLrpInstance>>>,
}

impl Coordinator {
    /// Creates a coordinator over the given store, configuration, and
    /// metrics sink.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: CoordinatorConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let (stops_tx, stops_rx) = mpsc::unbounded_channel();
        Self {
            store,
            config,
            sink,
            stops_tx,
            stops_rx: Mutex::new(Some(stops_rx)),
        }
    }

    /// Creates a coordinator with default configuration, emitting metrics
    /// through the `metrics` facade.
    #[must_use]
    pub fn with_defaults(store: Arc<dyn Store>) -> Self {
        Self::new(store, CoordinatorConfig::default(), Arc::new(FacadeSink))
    }

    /// Returns the configuration in use.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Takes the stop-instance stream.
    ///
    /// Convergence publishes a [`StopLrpInstance`] here for every actual
    /// whose process has no desired LRP. Single consumer: the receiver can
    /// be taken once; later calls return `None`.
    #[must_use]
    pub fn take_stop_stream(&self) -> Option<mpsc::UnboundedReceiver<StopLrpInstance>> {
        self.stops_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Publishes a stop directive. A send only fails once a consumer took
    /// the stream and dropped it; those directives are discarded.
    pub(crate) fn publish_stop(&self, stop: StopLrpInstance) {
        let _ = self.stops_tx.send(stop);
    }

    /// Runs `operation` until it yields a non-transient outcome, backing
    /// off exponentially (capped) between attempts.
    ///
    /// Only [`tally_core::Error::StoreUnavailable`] is retried; every
    /// other error (caller errors included) aborts immediately.
    pub(crate) async fn retry_transient<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.retry_backoff_base;
        loop {
            match operation().await {
                Err(error) if error.is_transient() => {
                    warn!(operation = name, error = %error, "store unavailable; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(self.config.retry_backoff_max);
                }
                other => return other,
            }
        }
    }
}
