//! Bounded-parallel hydration of store directories.
//!
//! Hydrations over hundreds of entries would be latency-bound under
//! serial reads; a bounded worker pool caps connection usage to the
//! store. The output carries **no defined order**; callers that need
//! ordering sort downstream.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;

use tally_core::{codec, Error, Result, Store};

/// Decodes every entry under `root` into a typed vec.
///
/// A missing subtree yields an empty vec. On the first decode failure the
/// error is recorded and the result is discarded: in-flight workers
/// complete, subsequent failures are dropped, and the call returns that
/// first error with no records.
pub async fn hydrate<T>(store: &dyn Store, root: &str, width: usize) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send,
{
    hydrate_filtered(store, root, width, |_| true).await
}

/// Like [`hydrate`], retaining only records for which `keep` holds.
///
/// The filter runs inside the worker, before the append.
pub async fn hydrate_filtered<T, F>(
    store: &dyn Store,
    root: &str,
    width: usize,
    keep: F,
) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send,
    F: Fn(&T) -> bool + Sync,
{
    let nodes = store.list_recursively(root).await?;
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    // Two independent mutexes, each guarding one short critical section:
    // an append, a conditional assign. Neither is held across a store call.
    let records = Mutex::new(Vec::with_capacity(nodes.len()));
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    let keep = &keep;
    let records = &records;
    let first_error = &first_error;
    stream::iter(nodes)
        .for_each_concurrent(width, |node| async move {
            match codec::decode::<T>(&node.key, &node.value) {
                Ok(record) => {
                    if keep(&record) {
                        records
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(record);
                    }
                }
                Err(error) => {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(error);
                    }
                }
            }
        })
        .await;

    if let Some(error) = first_error.lock().unwrap_or_else(PoisonError::into_inner).take() {
        return Err(error);
    }
    let hydrated = std::mem::take(&mut *records.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(hydrated)
}

/// One entry from a [`sweep`], decode outcome included.
///
/// `value` and `version` are the raw observation, retained so convergence
/// can issue identity compare-and-swaps against exactly what it saw.
#[derive(Debug)]
pub struct SweptNode<T> {
    /// Full key of the entry.
    pub key: String,
    /// Version observed at load.
    pub version: u64,
    /// Raw payload observed at load.
    pub value: Bytes,
    /// The decode outcome; malformed entries carry their error.
    pub record: Result<T>,
}

/// Decodes every entry under `root`, keeping per-entry outcomes.
///
/// Unlike [`hydrate`], malformed entries do not fail the call: convergence
/// needs to see them to prune them.
pub async fn sweep<T>(store: &dyn Store, root: &str, width: usize) -> Result<Vec<SweptNode<T>>>
where
    T: DeserializeOwned + Send,
{
    let nodes = store.list_recursively(root).await?;
    let swept = Mutex::new(Vec::with_capacity(nodes.len()));

    let swept_ref = &swept;
    stream::iter(nodes)
        .for_each_concurrent(width, |node| async move {
            let record = codec::decode::<T>(&node.key, &node.value);
            swept_ref
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(SweptNode {
                    key: node.key,
                    version: node.version,
                    value: node.value,
                    record,
                });
        })
        .await;

    Ok(swept.into_inner().unwrap_or_else(PoisonError::into_inner))
}
