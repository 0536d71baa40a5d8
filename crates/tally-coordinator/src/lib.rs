//! # tally-coordinator
//!
//! Workload coordination for tally: the library-level API that
//! schedulers, executor agents, and convergers consume.
//!
//! Desired state (what should run) and actual state (what does run) live
//! as records under a hierarchical, watchable, TTL-capable key-value
//! store. This crate provides:
//!
//! - **Writers**: the state transitions of long-running processes
//!   (desire / report / remove) and one-shot tasks
//!   (desire → claim → start → complete → resolve)
//! - **Watchers**: typed change streams over the desired and completed
//!   subtrees
//! - **Presence**: TTL-keyed executor liveness
//! - **Convergence**: the periodic reconciliation that prunes garbage,
//!   kicks drifted declarations, and emits stop directives for orphans
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally_core::MemoryStore;
//! use tally_coordinator::Coordinator;
//!
//! # async fn demo() -> tally_core::Result<()> {
//! let coordinator = Coordinator::with_defaults(Arc::new(MemoryStore::new()));
//! coordinator.converge_lrps().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod coordinator;
pub mod fanout;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod presence;
pub mod watch;

mod convergence;
mod lrps;
mod tasks;

// Re-export key types at crate root for ergonomics
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use lock::LockClaim;
pub use metrics::{CapturingSink, FacadeSink, MetricsSink};
pub use models::{
    ActualLrp, DesiredLrp, DesiredLrpChange, ExecutorPresence, LrpInstanceState, StopLrpInstance,
    Task,
};
pub use presence::PresenceGuard;
pub use watch::WatcherHandle;
