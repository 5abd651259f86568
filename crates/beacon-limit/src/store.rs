//! Keyed counter stores for fixed-window rate limiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use beacon_core::Result;

/// Shared counter store.
///
/// `increment` must be atomic end to end: concurrent callers on one key each
/// observe a distinct count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return the new value.
    ///
    /// A key that does not exist (or whose window expired) is created with
    /// count 1 and expires `window` after that first increment.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;
}

#[derive(Debug)]
struct Bucket {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store.
///
/// Uses the tokio clock, so window expiry follows a paused test clock.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop expired buckets. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.expires_at > now);
        before - buckets.len()
    }

    /// Number of tracked keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            expires_at: now + window,
        });
        if bucket.expires_at <= now {
            bucket.count = 0;
            bucket.expires_at = now + window;
        }
        bucket.count += 1;
        trace!(key, count = bucket.count, "Counter incremented");
        Ok(bucket.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_increment_counts_per_key() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);

        assert_eq!(store.increment("a", window).await.unwrap(), 1);
        assert_eq!(store.increment("a", window).await.unwrap(), 2);
        assert_eq!(store.increment("b", window).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_starts_at_first_increment() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);

        store.increment("a", window).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        // later increments do not extend the window
        assert_eq!(store.increment("a", window).await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.increment("a", window).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store.increment("short", Duration::from_secs(1)).await.unwrap();
        store.increment("long", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 0);
    }
}
