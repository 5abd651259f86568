//! Environment-driven configuration for live queries, rate limiting and logging.
//!
//! Each struct has a `Default` built from [`crate::defaults`], a `from_env()`
//! constructor, and `with_*` builders. Unparseable values fall back to the
//! default rather than failing startup.

use std::time::Duration;

use crate::defaults;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v != "false" && v != "0")
}

/// Live query engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveQueryConfig {
    /// Minimum interval between outbound emissions of one query.
    pub throttle_interval: Duration,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(defaults::LIVE_THROTTLE_MS),
        }
    }
}

impl LiveQueryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LIVE_THROTTLE_MS` | `1000` | Emission interval per live query |
    pub fn from_env() -> Self {
        let throttle_ms = env_u64("LIVE_THROTTLE_MS").unwrap_or(defaults::LIVE_THROTTLE_MS);
        Self {
            throttle_interval: Duration::from_millis(throttle_ms),
        }
    }

    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }
}

/// Default admission policy for the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// When false, every request is admitted.
    pub enabled: bool,
    /// Requests allowed per window and key.
    pub max_count: u64,
    /// Fixed window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: defaults::RATE_LIMIT_REQUESTS,
            window: Duration::from_secs(defaults::RATE_LIMIT_PERIOD_SECS),
        }
    }
}

impl RateLimitConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RATE_LIMIT_ENABLED` | `true` | Enable/disable admission checks |
    /// | `RATE_LIMIT_REQUESTS` | `100` | Requests per window |
    /// | `RATE_LIMIT_PERIOD_SECS` | `60` | Window length in seconds |
    pub fn from_env() -> Self {
        let enabled = env_flag("RATE_LIMIT_ENABLED").unwrap_or(true);
        let max_count = env_u64("RATE_LIMIT_REQUESTS")
            .unwrap_or(defaults::RATE_LIMIT_REQUESTS)
            .max(1);
        let window_secs = env_u64("RATE_LIMIT_PERIOD_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults::RATE_LIMIT_PERIOD_SECS);

        Self {
            enabled,
            max_count,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_count(mut self, max_count: u64) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration consumed by [`crate::logging::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Optional log file path; enables daily rolling file output.
    pub file: Option<String>,
    /// ANSI color override. `None` auto-detects (and disables for files).
    pub ansi: Option<bool>,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            file: None,
            ansi: None,
            default_filter: defaults::LOG_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LOG_FORMAT` | `text` | `json` or `text` |
    /// | `LOG_FILE` | unset | Path to a daily rolling log file |
    /// | `LOG_ANSI` | auto | `true`/`false` color override |
    pub fn from_env() -> Self {
        let format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let file = std::env::var("LOG_FILE").ok().filter(|v| !v.trim().is_empty());
        let ansi = std::env::var("LOG_ANSI")
            .ok()
            .map(|v| v == "true" || v == "1");

        Self {
            format,
            file,
            ansi,
            ..Self::default()
        }
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}
