//! Tracing subscriber setup and the log level contract.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recovered fault: reducer failure, store failure, rejected publish |
//! | INFO  | Lifecycle events: query opened/closed, store connected |
//! | DEBUG | Decision points: publish fan-out, restart, pruning |
//! | TRACE | Per-item delivery and registry changes |
//!
//! Structured field names used across crates: `query_id`, `query`, `topic`,
//! `scope`, `channel_id`, `subscriber_count`, `sequence`, `error`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};
use crate::defaults::LOG_FILE_NAME;
use crate::error::{Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.default_filter`. With `config.file` set, output
/// goes to a daily rolling file through a non-blocking writer; keep the
/// returned guard alive for the life of the process so buffered lines flush.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if let Some(ref path) = config.file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(LOG_FILE_NAME);
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let result = match config.format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        // no ANSI in files unless asked for
                        .with_ansi(config.ansi.unwrap_or(false)),
                )
                .try_init(),
        };
        result.map(|()| Some(guard))
    } else {
        let result = match config.format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init(),
            LogFormat::Text => {
                let mut layer = tracing_subscriber::fmt::layer();
                if let Some(ansi) = config.ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).try_init()
            }
        };
        result.map(|()| None)
    };

    let guard = installed.map_err(|e| Error::Config(format!("tracing init failed: {}", e)))?;

    tracing::info!(
        log_format = ?config.format,
        log_file = config.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    Ok(guard)
}
