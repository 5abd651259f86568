//! Centralized default constants for beacon.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in every crate reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// LIVE QUERIES
// =============================================================================

/// Default interval between outbound live-query emissions, in milliseconds.
///
/// Roughly one UI refresh per second per subscription.
pub const LIVE_THROTTLE_MS: u64 = 1000;

// =============================================================================
// TOPICS
// =============================================================================

/// Reserved event kind that forces every live query in a scope to resync.
pub const RESTART_KIND: &str = "restart";

/// Maximum length of a rendered topic channel name in bytes.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 1024;

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Default rate limit: max requests per window.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: window length in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Key prefix for rate-limit counters in the shared store.
pub const RATE_LIMIT_KEY_PREFIX: &str = "beacon:rl:";

// =============================================================================
// REDIS
// =============================================================================

/// Default Redis URL for the shared counter store.
pub const REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// LOGGING
// =============================================================================

/// Default `RUST_LOG` filter when none is set.
pub const LOG_FILTER: &str = "beacon=info";

/// Default log file name when `LOG_FILE` has no file component.
pub const LOG_FILE_NAME: &str = "beacon.log";
