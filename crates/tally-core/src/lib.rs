//! # tally-core
//!
//! Core abstractions for the tally workload coordinator.
//!
//! This crate provides the foundational types and traits used across all
//! tally components:
//!
//! - **Error Taxonomy**: The narrow set of failure kinds every operation
//!   maps into
//! - **Key Schema**: Canonical hierarchical paths for every persisted
//!   entity
//! - **Store Façade**: The versioned, TTL-capable, watchable key-value
//!   contract, with an in-memory backend for tests
//! - **Codec**: Symmetric JSON serialization of domain records
//!
//! ## Crate Boundary
//!
//! `tally-core` is the only crate allowed to define shared primitives.
//! Domain semantics (workload records, writers, convergence) live in
//! `tally-coordinator`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod codec;
pub mod error;
pub mod observability;
pub mod schema;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use observability::{init_logging, LogFormat};
pub use store::{
    maintain_node, MemoryStore, NodeMaintainer, Store, StoreNode, SwapResult, WatchEvent,
    WatchEventKind,
};
