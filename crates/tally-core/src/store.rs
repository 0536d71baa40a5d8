//! Store façade over the hierarchical key-value store.
//!
//! This module defines the core store contract that all backends must
//! implement:
//! - Per-key opaque, monotonically increasing versions for compare-and-swap
//! - TTL-capable writes for presence, claims, and locks
//! - Recursive listing and subtree watches
//!
//! The version token is a plain `u64` index: backends must guarantee that
//! successive writes to a key observe strictly increasing versions, which
//! is all compare-and-swap requires. Transport failures are normalized to
//! [`Error::StoreUnavailable`] so writers can retry uniformly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{Error, Result};

/// A single key-value entry read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNode {
    /// Full hierarchical key.
    pub key: String,
    /// Raw payload.
    pub value: Bytes,
    /// Per-key version at the time of the read, used for compare-and-swap.
    pub version: u64,
    /// Remaining time-to-live the entry was written with, if any.
    pub ttl: Option<Duration>,
}

/// Result of a conditional write.
///
/// A lost race is a normal result, never an error: callers decide whether
/// a conflict is retryable (lock acquisition) or final (convergence kick).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// The write succeeded; carries the new version.
    Swapped {
        /// Version of the key after the write.
        version: u64,
    },
    /// The precondition failed; carries the current version (0 when the
    /// key is absent).
    Conflict {
        /// Version that caused the conflict.
        current_version: u64,
    },
}

impl SwapResult {
    /// Returns true if the conditional write succeeded.
    #[must_use]
    pub const fn swapped(&self) -> bool {
        matches!(self, Self::Swapped { .. })
    }
}

/// The kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A key was created.
    Create,
    /// An existing key was overwritten (including identity writes).
    Update,
    /// A key was deleted.
    Delete,
}

/// A change notification for a watched subtree.
///
/// `before` is absent for creates; `after` is absent for deletes.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The kind of change.
    pub kind: WatchEventKind,
    /// The entry as it was before the change.
    pub before: Option<StoreNode>,
    /// The entry as it is after the change.
    pub after: Option<StoreNode>,
}

impl WatchEvent {
    /// Returns the key the event concerns.
    #[must_use]
    pub fn key(&self) -> &str {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map_or("", |node| node.key.as_str())
    }
}

/// Store contract for the hierarchical key-value store.
///
/// All operations may suspend indefinitely against a real backend; every
/// suspension is cancellable by dropping the future. Within a single
/// subtree, watch events are delivered in mutation order.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads a single key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<StoreNode>;

    /// Writes a key unconditionally, returning the new version.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<u64>;

    /// Writes a key only if its current version matches `expected_version`.
    /// Any TTL on the key is carried over by the swap.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Bytes,
    ) -> Result<SwapResult>;

    /// Creates a key only if it does not already exist.
    async fn create_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<SwapResult>;

    /// Deletes a key or subtree. Succeeds even if nothing exists (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Writes several keys. Not atomic across keys.
    async fn set_multi(&self, pairs: Vec<(String, Bytes)>) -> Result<()>;

    /// Lists every entry under a prefix, in arbitrary order.
    ///
    /// A missing subtree yields an empty vec, not an error.
    async fn list_recursively(&self, prefix: &str) -> Result<Vec<StoreNode>>;

    /// Subscribes to changes under a prefix.
    ///
    /// The subscription ends when the receiver is dropped.
    async fn watch(&self, prefix: &str) -> Result<mpsc::UnboundedReceiver<WatchEvent>>;
}

/// Returns true if `key` lies within the subtree rooted at `prefix`.
fn key_in_subtree(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    version: u64,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

struct Watcher {
    prefix: String,
    sender: mpsc::UnboundedSender<WatchEvent>,
}

struct Inner {
    entries: HashMap<String, StoredEntry>,
    watchers: Vec<Watcher>,
    next_version: u64,
    reachable: bool,
}

/// In-memory store for testing and development.
///
/// Thread-safe via a single mutex around short critical sections. Not
/// suitable for production: no durability, single-process only.
///
/// Two behaviors support the test surface:
/// - TTL expiry is lazy: expired entries are purged on the next operation
///   and do not notify watchers.
/// - [`MemoryStore::set_reachable`] simulates an outage; while unreachable
///   every operation fails with [`Error::StoreUnavailable`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                watchers: Vec::new(),
                next_version: 0,
                reachable: true,
            }),
        }
    }

    /// Simulates the store going away (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock_inner().reachable = reachable;
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Purges expired entries, then checks reachability.
    fn check_and_purge(inner: &mut Inner) -> Result<()> {
        if !inner.reachable {
            return Err(Error::unavailable("store is unreachable"));
        }
        let now = Instant::now();
        inner
            .entries
            .retain(|_, entry| entry.expires_at.is_none_or(|deadline| deadline > now));
        Ok(())
    }

    fn node(key: &str, entry: &StoredEntry) -> StoreNode {
        StoreNode {
            key: key.to_string(),
            value: entry.value.clone(),
            version: entry.version,
            ttl: entry.ttl,
        }
    }

    fn notify(inner: &mut Inner, event: WatchEvent) {
        let key = event.key().to_string();
        inner.watchers.retain(|watcher| {
            if !key_in_subtree(&key, &watcher.prefix) {
                return true;
            }
            watcher.sender.send(event.clone()).is_ok()
        });
    }

    fn write(
        inner: &mut Inner,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> u64 {
        inner.next_version += 1;
        let version = inner.next_version;
        let entry = StoredEntry {
            value,
            version,
            ttl,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        let before = inner
            .entries
            .insert(key.to_string(), entry.clone())
            .map(|prev| Self::node(key, &prev));
        let kind = if before.is_some() {
            WatchEventKind::Update
        } else {
            WatchEventKind::Create
        };
        Self::notify(
            inner,
            WatchEvent {
                kind,
                before,
                after: Some(Self::node(key, &entry)),
            },
        );
        version
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<StoreNode> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        inner
            .entries
            .get(key)
            .map(|entry| Self::node(key, entry))
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<u64> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        Ok(Self::write(&mut inner, key, value, ttl))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Bytes,
    ) -> Result<SwapResult> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        let current = inner.entries.get(key).map(|entry| entry.version);
        match current {
            Some(version) if version == expected_version => {
                let ttl = inner.entries.get(key).and_then(|entry| entry.ttl);
                let version = Self::write(&mut inner, key, value, ttl);
                Ok(SwapResult::Swapped { version })
            }
            Some(version) => Ok(SwapResult::Conflict {
                current_version: version,
            }),
            None => Ok(SwapResult::Conflict { current_version: 0 }),
        }
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<SwapResult> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        if let Some(existing) = inner.entries.get(key) {
            return Ok(SwapResult::Conflict {
                current_version: existing.version,
            });
        }
        let version = Self::write(&mut inner, key, value, ttl);
        Ok(SwapResult::Swapped { version })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        // Deleting a key removes it; deleting a prefix removes the subtree.
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|candidate| key_in_subtree(candidate, key))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(prev) = inner.entries.remove(&key) {
                let before = Self::node(&key, &prev);
                Self::notify(
                    &mut inner,
                    WatchEvent {
                        kind: WatchEventKind::Delete,
                        before: Some(before),
                        after: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_multi(&self, pairs: Vec<(String, Bytes)>) -> Result<()> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        for (key, value) in pairs {
            Self::write(&mut inner, &key, value, None);
        }
        Ok(())
    }

    async fn list_recursively(&self, prefix: &str) -> Result<Vec<StoreNode>> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        Ok(inner
            .entries
            .iter()
            .filter(|(key, _)| key_in_subtree(key, prefix))
            .map(|(key, entry)| Self::node(key, entry))
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        let mut inner = self.lock_inner();
        Self::check_and_purge(&mut inner)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(receiver)
    }
}

// ============================================================================
// TTL maintenance
// ============================================================================

/// Handle to a background TTL refresher started by [`maintain_node`].
///
/// Dropping the handle aborts the refresher; prefer [`NodeMaintainer::stop`]
/// for an orderly shutdown. Either way the key is left to expire naturally.
pub struct NodeMaintainer {
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl NodeMaintainer {
    /// Stops the refresher and waits for it to exit. The maintained key is
    /// not deleted; its TTL runs out on its own.
    pub async fn stop(mut self) {
        self.stop.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NodeMaintainer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Writes a TTL key and keeps it alive until stopped.
///
/// The initial write is an atomic create: if the key is already held the
/// call fails promptly with [`Error::ResourceBusy`]. A background task
/// then rewrites the key every `ttl / 2` (strictly less than the TTL, so a
/// healthy refresher never lets the key lapse). Refresh failures are
/// logged and retried on the next tick.
pub async fn maintain_node(
    store: Arc<dyn Store>,
    key: String,
    value: Bytes,
    ttl: Duration,
) -> Result<NodeMaintainer> {
    match store.create_if_absent(&key, value.clone(), Some(ttl)).await? {
        SwapResult::Swapped { .. } => {}
        SwapResult::Conflict { .. } => {
            return Err(Error::busy(format!("node already held: {key}")));
        }
    }

    let stop = Arc::new(Notify::new());
    let stop_signal = Arc::clone(&stop);
    let refresh_every = ttl / 2;
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = stop_signal.notified() => break,

                () = tokio::time::sleep(refresh_every) => {
                    if let Err(error) = store.set(&key, value.clone(), Some(ttl)).await {
                        warn!(key = %key, error = %error, "failed to refresh maintained node");
                    }
                }
            }
        }
    });

    Ok(NodeMaintainer {
        stop,
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = MemoryStore::new();
        let version = store
            .set("/v1/desired/pg", Bytes::from("payload"), None)
            .await
            .expect("set");
        let node = store.get("/v1/desired/pg").await.expect("get");
        assert_eq!(node.value, Bytes::from("payload"));
        assert_eq!(node.version, version);
        assert_eq!(node.ttl, None);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("/v1/desired/absent").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn versions_increase_per_key() {
        let store = MemoryStore::new();
        let first = store.set("/k", Bytes::from("a"), None).await.unwrap();
        let second = store.set("/k", Bytes::from("b"), None).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn compare_and_swap_enforces_version() {
        let store = MemoryStore::new();
        let version = store.set("/k", Bytes::from("v1"), None).await.unwrap();

        let result = store
            .compare_and_swap("/k", version, Bytes::from("v2"))
            .await
            .unwrap();
        assert!(result.swapped());

        // Stale version loses.
        let result = store
            .compare_and_swap("/k", version, Bytes::from("v3"))
            .await
            .unwrap();
        assert!(matches!(result, SwapResult::Conflict { .. }));

        // Missing key reports version 0.
        let result = store
            .compare_and_swap("/absent", 7, Bytes::from("x"))
            .await
            .unwrap();
        assert_eq!(result, SwapResult::Conflict { current_version: 0 });
    }

    #[tokio::test]
    async fn create_if_absent_is_atomic() {
        let store = MemoryStore::new();
        let first = store
            .create_if_absent("/lock", Bytes::from("a"), None)
            .await
            .unwrap();
        assert!(first.swapped());

        let second = store
            .create_if_absent("/lock", Bytes::from("b"), None)
            .await
            .unwrap();
        assert!(matches!(second, SwapResult::Conflict { .. }));
    }

    #[tokio::test]
    async fn list_recursively_respects_subtree_boundaries() {
        let store = MemoryStore::new();
        store.set("/v1/task/pending/a", Bytes::from("a"), None).await.unwrap();
        store.set("/v1/task/pending/b", Bytes::from("b"), None).await.unwrap();
        store.set("/v1/task/pending-extra/c", Bytes::from("c"), None).await.unwrap();

        let listed = store.list_recursively("/v1/task/pending").await.unwrap();
        assert_eq!(listed.len(), 2);

        let missing = store.list_recursively("/v1/nothing").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_subtrees_idempotently() {
        let store = MemoryStore::new();
        store.set("/v1/actual/pg/ig-1", Bytes::from("a"), None).await.unwrap();
        store.set("/v1/actual/pg/ig-2", Bytes::from("b"), None).await.unwrap();

        store.delete("/v1/actual/pg").await.expect("delete subtree");
        assert!(store.list_recursively("/v1/actual").await.unwrap().is_empty());

        // Deleting again is fine.
        store.delete("/v1/actual/pg").await.expect("repeat delete");
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_entries_expire() {
        let store = MemoryStore::new();
        store
            .set("/v1/executor/ex", Bytes::new(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(store.get("/v1/executor/ex").await.is_ok());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(matches!(
            store.get("/v1/executor/ex").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_reachable(false);

        assert!(store.get("/k").await.unwrap_err().is_transient());
        assert!(store
            .set("/k", Bytes::from("v"), None)
            .await
            .unwrap_err()
            .is_transient());
        assert!(store.list_recursively("/").await.unwrap_err().is_transient());

        store.set_reachable(true);
        assert!(store.set("/k", Bytes::from("v"), None).await.is_ok());
    }

    #[tokio::test]
    async fn watch_reports_creates_updates_and_deletes() {
        let store = MemoryStore::new();
        let mut events = store.watch("/v1/desired").await.unwrap();

        store.set("/v1/desired/pg", Bytes::from("a"), None).await.unwrap();
        store.set("/v1/desired/pg", Bytes::from("b"), None).await.unwrap();
        store.delete("/v1/desired/pg").await.unwrap();
        // Outside the watched subtree: no event.
        store.set("/v1/task/pending/t", Bytes::from("t"), None).await.unwrap();

        let created = events.recv().await.expect("create event");
        assert_eq!(created.kind, WatchEventKind::Create);
        assert!(created.before.is_none());
        assert_eq!(created.after.as_ref().unwrap().value, Bytes::from("a"));

        let updated = events.recv().await.expect("update event");
        assert_eq!(updated.kind, WatchEventKind::Update);
        assert_eq!(updated.before.as_ref().unwrap().value, Bytes::from("a"));
        assert_eq!(updated.after.as_ref().unwrap().value, Bytes::from("b"));

        let deleted = events.recv().await.expect("delete event");
        assert_eq!(deleted.kind, WatchEventKind::Delete);
        assert!(deleted.after.is_none());

        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn maintain_node_refreshes_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        let maintainer = maintain_node(
            Arc::clone(&store) as Arc<dyn Store>,
            "/v1/executor/ex".into(),
            Bytes::new(),
            Duration::from_secs(1),
        )
        .await
        .expect("maintain");

        // Several TTL windows later the key is still present.
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.get("/v1/executor/ex").await.is_ok());

        maintainer.stop().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            store.get("/v1/executor/ex").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn maintain_node_reports_held_keys() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/v1/executor/ex", Bytes::new(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let result = maintain_node(
            Arc::clone(&store) as Arc<dyn Store>,
            "/v1/executor/ex".into(),
            Bytes::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(Error::ResourceBusy { .. })));
    }
}
