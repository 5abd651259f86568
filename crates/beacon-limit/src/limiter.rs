//! Fixed-window admission check.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use beacon_core::RateLimitConfig;

use crate::store::{CounterStore, MemoryCounterStore};

/// Fixed-window rate limiter over a shared [`CounterStore`].
///
/// Each call counts against `key` for the current window. Bursts straddling a
/// window boundary can briefly reach twice the nominal rate.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Limiter over a fresh [`MemoryCounterStore`].
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()), config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `key`; true means the caller should reject it.
    ///
    /// Returns true once more than `max_count` requests landed in the current
    /// window. Always false when limiting is disabled. Store failures are
    /// logged and admit the request.
    pub async fn should_rate_limit(&self, key: &str, max_count: u64, window: Duration) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.store.increment(key, window).await {
            Ok(count) if count > max_count => {
                debug!(key, count, max_count, "Rate limit exceeded");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(key, error = %e, "Rate limit store failed, admitting request");
                false
            }
        }
    }

    /// [`Self::should_rate_limit`] with the configured budget and window.
    pub async fn check(&self, key: &str) -> bool {
        self.should_rate_limit(key, self.config.max_count, self.config.window)
            .await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
