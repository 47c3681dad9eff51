//! Time-bounded snapshot cache shared across requests.
//!
//! Readers clone an `Arc` to the current snapshot and never observe a
//! partial update. A refresh builds a complete new snapshot and swaps it in;
//! the refresh mutex keeps a single writer at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// An immutable cached value and when it was loaded.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: T,
    pub loaded_at: DateTime<Utc>,
    fetched: Instant,
}

impl<T> Snapshot<T> {
    pub fn age(&self) -> Duration {
        self.fetched.elapsed()
    }
}

/// How a value was served by [`SnapshotCache::get_or_refresh`].
#[derive(Debug)]
pub struct Served<T> {
    pub snapshot: Arc<Snapshot<T>>,
    pub from_cache: bool,
}

#[derive(Debug)]
pub struct SnapshotCache<T> {
    ttl: Duration,
    current: RwLock<Option<Arc<Snapshot<T>>>>,
    refresh: Mutex<()>,
}

impl<T> SnapshotCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current snapshot, fresh or stale.
    pub async fn current(&self) -> Option<Arc<Snapshot<T>>> {
        self.current.read().await.clone()
    }

    /// The current snapshot if it is younger than the TTL.
    pub async fn fresh(&self) -> Option<Arc<Snapshot<T>>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|s| s.age() < self.ttl)
            .cloned()
    }

    /// Replace the snapshot wholesale.
    pub async fn replace(&self, value: T) -> Arc<Snapshot<T>> {
        let snapshot = Arc::new(Snapshot {
            value,
            loaded_at: Utc::now(),
            fetched: Instant::now(),
        });
        *self.current.write().await = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    /// Serve the fresh snapshot, or run `fetch` and swap in its result.
    ///
    /// Concurrent callers that find the cache expired queue on the refresh
    /// lock; the first one fetches and the rest are served its snapshot.
    /// A failed fetch leaves the previous snapshot in place.
    pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Result<Served<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(snapshot) = self.fresh().await {
            return Ok(Served {
                snapshot,
                from_cache: true,
            });
        }

        let _writer = self.refresh.lock().await;
        if let Some(snapshot) = self.fresh().await {
            return Ok(Served {
                snapshot,
                from_cache: true,
            });
        }

        debug!(ttl_secs = self.ttl.as_secs(), "snapshot expired, refreshing");
        let value = fetch().await?;
        let snapshot = self.replace(value).await;
        Ok(Served {
            snapshot,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fresh_within_ttl_then_expires() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        assert!(cache.fresh().await.is_none());

        cache.replace(7u32).await;
        assert_eq!(cache.fresh().await.map(|s| s.value), Some(7));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.fresh().await.is_none());
        // stale snapshot is still readable
        assert_eq!(cache.current().await.map(|s| s.value), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_refresh_fetches_once_per_ttl() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42u32)
        };

        let first = cache.get_or_refresh(fetch).await.unwrap();
        assert!(!first.from_cache);
        let second = cache.get_or_refresh(fetch).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.snapshot.value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache.get_or_refresh(fetch).await.unwrap();
        assert!(!third.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let cache = SnapshotCache::new(Duration::from_secs(1));
        cache.replace(1u32).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let err = cache
            .get_or_refresh(|| async { Err::<u32, _>("down") })
            .await
            .unwrap_err();
        assert_eq!(err, "down");
        assert_eq!(cache.current().await.map(|s| s.value), Some(1));
    }

    #[tokio::test]
    async fn test_readers_keep_their_snapshot_across_replace() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        cache.replace(vec![1, 2, 3]).await;
        let held = cache.current().await.unwrap();
        cache.replace(vec![9]).await;
        assert_eq!(held.value, vec![1, 2, 3]);
        assert_eq!(cache.current().await.unwrap().value, vec![9]);
    }
}
