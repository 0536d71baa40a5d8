//! Periodic reconciliation of desired and actual state.
//!
//! Convergence rebuilds the desired/actual join from scratch each pass
//! and issues corrective mutations. Every action is idempotent: two
//! concurrent convergers reach the same end state, so the advisory lock
//! only avoids wasted work.
//!
//! Per-action failures are logged and never abort a pass; a transient
//! store failure during load returns early without mutating anything.

mod lrp;
mod task;

use bytes::Bytes;

use tally_core::{Result, Store};

/// Rewrites a key with the exact value observed at load, at the observed
/// version. Watchers wake on the identity write. Returns `false` on a
/// version conflict: another converger or writer already touched the key
/// and the kick is unnecessary.
async fn kick(store: &dyn Store, key: &str, version: u64, value: Bytes) -> Result<bool> {
    Ok(store.compare_and_swap(key, version, value).await?.swapped())
}
