//! Redis-backed counter store.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to disable (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{info, trace, warn};

use beacon_core::defaults::{RATE_LIMIT_KEY_PREFIX, REDIS_URL};
use beacon_core::{Error, Result};

use crate::store::CounterStore;

/// Increment, and start the expiry clock only when the key was just created.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store shared across processes through Redis.
///
/// The increment and the expiry are set in one Lua script, so a crash between
/// the two can never leave a counter without a TTL.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
    prefix: String,
}

impl RedisCounterStore {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Store(format!("Redis connection failed: {}", e)))?;
        info!(
            url = %url.replace(|c: char| c.is_ascii_alphanumeric(), "*"),
            "Redis counter store connected"
        );
        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            prefix: RATE_LIMIT_KEY_PREFIX.to_string(),
        })
    }

    /// Connect using `REDIS_ENABLED` / `REDIS_URL`.
    ///
    /// Returns `None` when disabled or unreachable; callers fall back to a
    /// process-local store.
    pub async fn from_env() -> Option<Self> {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if !enabled {
            info!("Redis counter store disabled via REDIS_ENABLED=false");
            return None;
        }

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| REDIS_URL.to_string());
        match Self::connect(&url).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, counter store disabled");
                None
            }
        }
    }

    /// Use `prefix` instead of the default `beacon:rl:`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Expiry argument for PEXPIRE; Redis rejects zero.
fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let redis_key = self.key_for(key);
        let mut connection = self.connection.clone();
        let count: u64 = self
            .script
            .key(&redis_key)
            .arg(window_millis(window))
            .invoke_async(&mut connection)
            .await
            .map_err(|e| Error::Store(format!("Redis increment failed: {}", e)))?;
        trace!(key = %redis_key, count, "Counter incremented");
        Ok(count)
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
