//! Keyed query cache shared by every consumer of a backend resource
//!
//! One [`QueryCache`] handle is created at startup and cloned into each
//! controller. Entries are type-erased; readers name the type they expect.
//!
//! Each key carries a fetch epoch. [`QueryCache::cancel_queries`] bumps it,
//! and any fetch that started under an older epoch drops its result instead
//! of overwriting data written since (e.g. by an optimistic mutation).

use std::any::Any;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{Result, SyncError};

/// Identifies one cached resource, e.g. `config/quick`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    #[must_use]
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn quick_settings() -> Self {
        Self::new(["config", "quick"])
    }

    #[must_use]
    pub fn options() -> Self {
        Self::new(["config", "options"])
    }

    #[must_use]
    pub fn task_overview() -> Self {
        Self::new(["tasks", "overview"])
    }

    #[must_use]
    pub fn solutions() -> Self {
        Self::new(["produce", "solutions"])
    }

    #[must_use]
    pub fn solution(id: &str) -> Self {
        Self::new(["produce", "solutions", id])
    }

    #[must_use]
    pub fn idols() -> Self {
        Self::new(["produce", "idols"])
    }

    #[inline]
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Default)]
struct Entry {
    value: Option<Arc<dyn Any + Send + Sync>>,
    stale: bool,
    epoch: u64,
}

/// Process-wide store of fetched backend state
///
/// Cheap to clone; clones share entries.
#[derive(Debug, Clone)]
pub struct QueryCache {
    entries: Arc<DashMap<QueryKey, Entry>>,
    changes: broadcast::Sender<QueryKey>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(DashMap::new()),
            changes,
        }
    }

    /// Cached value for `key`, if present and of type `T`
    #[must_use]
    pub fn get<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_arc::<T>(key).map(|v| (*v).clone())
    }

    /// Shared handle to the cached value
    #[must_use]
    pub fn get_arc<T>(&self, key: &QueryKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.entries.get(key)?.value.clone()?;
        value.downcast::<T>().ok()
    }

    /// Store `value` as fresh data for `key`
    pub fn set<T>(&self, key: &QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.value = Some(Arc::new(value));
            entry.stale = false;
        }
        self.notify(key);
    }

    /// Apply `f` to a copy of the cached value and store the copy
    ///
    /// Returns `false` (and leaves the entry alone) when there is no value of
    /// type `T`. Handles to the previous value are unaffected.
    pub fn update<T, F>(&self, key: &QueryKey, f: F) -> bool
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut T),
    {
        let applied = match self.entries.get_mut(key) {
            Some(mut entry) => {
                let current = entry
                    .value
                    .as_ref()
                    .and_then(|v| v.downcast_ref::<T>())
                    .cloned();
                match current {
                    Some(mut next) => {
                        f(&mut next);
                        entry.value = Some(Arc::new(next));
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        if applied {
            self.notify(key);
        }
        applied
    }

    /// Drop the cached value; the epoch survives so cancelled fetches stay cancelled
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self
            .entries
            .get_mut(key)
            .and_then(|mut entry| entry.value.take())
            .is_some();
        if removed {
            self.notify(key);
        }
        removed
    }

    /// Mark `key` stale without fetching; the next [`Self::ensure`] refetches
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
    }

    /// Whether `key` needs a fetch (absent or invalidated)
    #[must_use]
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries
            .get(key)
            .map_or(true, |entry| entry.stale || entry.value.is_none())
    }

    /// Discard the results of fetches for `key` that are currently in flight
    pub fn cancel_queries(&self, key: &QueryKey) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.epoch += 1;
        tracing::debug!("Cancelled in-flight queries for {}", key);
    }

    fn epoch(&self, key: &QueryKey) -> u64 {
        self.entries.get(key).map_or(0, |entry| entry.epoch)
    }

    /// Run `fut` and store its result under `key`
    ///
    /// # Errors
    /// The fetch's own error, or `SyncError::Cancelled` when
    /// [`Self::cancel_queries`] ran while it was in flight
    pub async fn fetch<T, E, Fut>(&self, key: &QueryKey, fut: Fut) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<SyncError>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let started = self.epoch(key);
        let value = fut.await.map_err(Into::into)?;

        {
            let mut entry = self.entries.entry(key.clone()).or_default();
            if entry.epoch != started {
                tracing::debug!("Dropping cancelled fetch result for {}", key);
                return Err(SyncError::Cancelled(key.clone()));
            }
            entry.value = Some(Arc::new(value.clone()));
            entry.stale = false;
        }
        self.notify(key);
        Ok(value)
    }

    /// Cached value when fresh, otherwise fetch it
    ///
    /// # Errors
    /// As [`Self::fetch`]
    pub async fn ensure<T, E, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<SyncError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if !self.is_stale(key) {
            if let Some(cached) = self.get::<T>(key) {
                return Ok(cached);
            }
        }
        self.fetch(key, fetcher()).await
    }

    /// Receive the key of every entry whose value changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.changes.subscribe()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value.is_some()).count()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &QueryKey) {
        // No subscribers is fine.
        let _ = self.changes.send(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaa_api::ApiError;

    fn key() -> QueryKey {
        QueryKey::new(["test"])
    }

    #[test]
    fn set_get_typed() {
        let cache = QueryCache::new();
        cache.set(&key(), 41_u32);
        assert_eq!(cache.get::<u32>(&key()), Some(41));
        assert_eq!(cache.get::<String>(&key()), None);
        assert!(!cache.is_stale(&key()));
    }

    #[test]
    fn update_is_copy_on_write() {
        let cache = QueryCache::new();
        cache.set(&key(), vec![1, 2]);
        let before = cache.get_arc::<Vec<i32>>(&key()).unwrap();

        assert!(cache.update::<Vec<i32>, _>(&key(), |v| v.push(3)));
        assert_eq!(*before, vec![1, 2]);
        assert_eq!(cache.get::<Vec<i32>>(&key()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn update_without_data_is_noop() {
        let cache = QueryCache::new();
        assert!(!cache.update::<u32, _>(&key(), |v| *v += 1));
        assert_eq!(cache.get::<u32>(&key()), None);
    }

    #[test]
    fn invalidate_marks_stale_keeps_value() {
        let cache = QueryCache::new();
        cache.set(&key(), "x".to_string());
        cache.invalidate(&key());
        assert!(cache.is_stale(&key()));
        assert_eq!(cache.get::<String>(&key()).as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn cancelled_fetch_does_not_overwrite() {
        let cache = QueryCache::new();
        cache.set(&key(), 1_u32);

        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let fetch = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch(&key(), async { Ok::<_, ApiError>(rx.await.unwrap_or(0)) })
                    .await
            })
        };
        tokio::task::yield_now().await;

        cache.cancel_queries(&key());
        cache.set(&key(), 2_u32);
        tx.send(99).unwrap();

        let result = fetch.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled(_))));
        assert_eq!(cache.get::<u32>(&key()), Some(2));
    }

    #[tokio::test]
    async fn ensure_uses_fresh_value() {
        let cache = QueryCache::new();
        let first: u32 = cache.ensure(&key(), || async { Ok::<_, ApiError>(5) }).await.unwrap();
        assert_eq!(first, 5);

        let second: u32 = cache
            .ensure(&key(), || async { Ok::<_, ApiError>(6) })
            .await
            .unwrap();
        assert_eq!(second, 5);

        cache.invalidate(&key());
        let third: u32 = cache.ensure(&key(), || async { Ok::<_, ApiError>(7) }).await.unwrap();
        assert_eq!(third, 7);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_entry() {
        let cache = QueryCache::new();
        cache.set(&key(), 3_u32);
        let err = cache
            .fetch::<u32, _, _>(&key(), async {
                Err(ApiError::Status {
                    status: 500,
                    detail: None,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 500");
        assert_eq!(cache.get::<u32>(&key()), Some(3));
    }

    #[test]
    fn subscribers_see_changes() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        cache.set(&key(), 1_u8);
        assert_eq!(rx.try_recv().unwrap(), key());
        cache.invalidate(&key());
        assert!(rx.try_recv().is_err());
    }
}
