//! Read-through cache for resource queries.
//!
//! Entries are keyed by resource name plus the serialized query parameters,
//! so `work-orders?page=1` and `work-orders?page=2` are cached separately and
//! both dropped by `invalidate("work-orders")`.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Error;

/// Cache key: resource name plus canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    resource: &'static str,
    params: String,
}

impl QueryKey {
    /// Key for a parameterless query (`users`, `dashboard/stats`).
    #[must_use]
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            params: String::new(),
        }
    }

    /// Key for a query distinguished by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `params` cannot be serialized.
    pub fn with_params<P: Serialize + ?Sized>(resource: &'static str, params: &P) -> Result<Self, Error> {
        let params = serde_json::to_string(params).map_err(Error::Encode)?;
        Ok(Self { resource, params })
    }

    #[must_use]
    pub fn resource(&self) -> &'static str {
        self.resource
    }
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
}

/// Bumped by `clear` (globally) and `invalidate` (per resource). A fetch that
/// started under an older stamp is not cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    cleared: u64,
    invalidated: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<QueryKey, Entry>,
    cleared: u64,
    invalidated: HashMap<String, u64>,
}

impl State {
    fn stamp(&self, resource: &str) -> Stamp {
        Stamp {
            cleared: self.cleared,
            invalidated: self.invalidated.get(resource).copied().unwrap_or(0),
        }
    }
}

pub struct QueryCache {
    stale_time: Duration,
    state: RwLock<State>,
}

impl QueryCache {
    #[must_use]
    pub fn new(stale_time: Duration) -> Self {
        Self {
            stale_time,
            state: RwLock::new(State::default()),
        }
    }

    /// Fresh cached value for `key`, if one exists and has type `T`.
    pub async fn get<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let state = self.state.read().await;
        let entry = state.entries.get(key)?;
        if entry.fetched_at.elapsed() >= self.stale_time {
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    pub async fn insert<T>(&self, key: QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.state.write().await.entries.insert(key, Entry::new(value));
    }

    /// Serve `key` from cache, or run `fetch` and cache its success.
    ///
    /// The result is not cached if the cache was cleared or `key`'s resource
    /// invalidated while `fetch` was running.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`; failures are never cached.
    pub async fn get_or_fetch<T, F>(&self, key: QueryKey, fetch: F) -> Result<T, Error>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T, Error>>,
    {
        let started = {
            let state = self.state.read().await;
            if let Some(hit) = state
                .entries
                .get(&key)
                .filter(|e| e.fetched_at.elapsed() < self.stale_time)
                .and_then(|e| e.value.downcast_ref::<T>())
            {
                debug!(resource = key.resource, "Query cache hit");
                return Ok(hit.clone());
            }
            state.stamp(key.resource)
        };

        let value = fetch.await?;

        let mut state = self.state.write().await;
        if state.stamp(key.resource) == started {
            state.entries.insert(key, Entry::new(value.clone()));
        } else {
            debug!(resource = key.resource, "Query cache reset during fetch, result not cached");
        }
        Ok(value)
    }

    /// Drop every entry of `resource`. Returns how many were removed.
    pub async fn invalidate(&self, resource: &str) -> usize {
        let mut state = self.state.write().await;
        *state.invalidated.entry(resource.to_string()).or_default() += 1;
        let before = state.entries.len();
        state.entries.retain(|k, _| k.resource != resource);
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(resource, removed, "Query cache invalidated");
        }
        removed
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.cleared += 1;
        state.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

impl Entry {
    fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            fetched_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("stale_time", &self.stale_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);
        let key = QueryKey::new("users");

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(key.clone(), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_refetches() {
        let cache = QueryCache::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);
        let key = QueryKey::new("users");

        for _ in 0..2 {
            cache
                .get_or_fetch(key.clone(), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(1_u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let key = QueryKey::new("dashboard");

        let result: Result<u32, Error> = cache
            .get_or_fetch(key.clone(), async { Err::<u32, _>(Error::SessionExpired) })
            .await;
        assert!(matches!(result, Err(Error::SessionExpired)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_params_distinguish_entries() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let page1 = QueryKey::with_params("work-orders", &[("page", 1)]).unwrap();
        let page2 = QueryKey::with_params("work-orders", &[("page", 2)]).unwrap();

        cache.insert(page1.clone(), "first".to_string()).await;
        assert_eq!(cache.get::<String>(&page1).await.as_deref(), Some("first"));
        assert_eq!(cache.get::<String>(&page2).await, None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_miss() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let key = QueryKey::new("users");
        cache.insert(key.clone(), 5_u64).await;
        assert_eq!(cache.get::<String>(&key).await, None);
        assert_eq!(cache.get::<u64>(&key).await, Some(5));
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_resource() {
        let cache = QueryCache::new(Duration::from_secs(30));
        cache
            .insert(QueryKey::with_params("work-orders", &1).unwrap(), 1_u8)
            .await;
        cache
            .insert(QueryKey::with_params("work-orders", &2).unwrap(), 2_u8)
            .await;
        cache.insert(QueryKey::new("issues"), 3_u8).await;

        assert_eq!(cache.invalidate("work-orders").await, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get::<u8>(&QueryKey::new("issues")).await, Some(3));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_discards_result() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let key = QueryKey::new("users");

        let value = cache
            .get_or_fetch(key.clone(), async {
                cache.clear().await;
                Ok::<_, Error>("previous user's list".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "previous user's list");
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_is_scoped_to_resource() {
        let cache = QueryCache::new(Duration::from_secs(30));
        let orders = QueryKey::new("work-orders");
        let users = QueryKey::new("users");

        cache
            .get_or_fetch(orders.clone(), async {
                cache.invalidate("work-orders").await;
                Ok::<_, Error>(1_u8)
            })
            .await
            .unwrap();
        assert_eq!(cache.get::<u8>(&orders).await, None);

        cache
            .get_or_fetch(users.clone(), async {
                cache.invalidate("work-orders").await;
                Ok::<_, Error>(2_u8)
            })
            .await
            .unwrap();
        assert_eq!(cache.get::<u8>(&users).await, Some(2));

        // A later fetch under the new stamp is cached again.
        cache
            .get_or_fetch(orders.clone(), async { Ok::<_, Error>(3_u8) })
            .await
            .unwrap();
        assert_eq!(cache.get::<u8>(&orders).await, Some(3));
    }
}
