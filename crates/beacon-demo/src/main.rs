//! beacon-demo: stream a live counter query to stdout.
//!
//! Publishes increments for one scope (each admitted through the rate
//! limiter), forces a restart halfway through and prints every update the
//! live query emits as one JSON line.

mod counter;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use beacon_core::logging::init_tracing;
use beacon_core::{EventBus, LiveQueryConfig, LogConfig, RateLimitConfig};
use beacon_limit::{RateLimiter, RedisCounterStore};
use beacon_live::{LiveQueryEngine, LiveQueryRegistry};

use crate::counter::{CounterEvent, CounterSource};

#[derive(Parser, Debug)]
#[command(name = "beacon-demo")]
#[command(author, version, about = "Stream a live counter query to stdout")]
struct Cli {
    /// Scope key the counter lives under
    #[arg(short, long, default_value = "demo")]
    scope: String,

    /// Number of increments to publish
    #[arg(short, long, default_value_t = 20)]
    events: u32,

    /// Throttle interval in milliseconds (default: LIVE_THROTTLE_MS)
    #[arg(short, long)]
    throttle_ms: Option<u64>,

    /// Pause for one throttle interval after every N increments (0: never)
    #[arg(short, long, default_value_t = 5)]
    burst_every: u32,

    /// Share rate-limit counters through Redis (REDIS_URL) when reachable
    #[arg(long)]
    redis: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(&LogConfig::from_env())?;

    let mut live_config = LiveQueryConfig::from_env();
    if let Some(ms) = cli.throttle_ms {
        live_config = live_config.with_throttle_interval(Duration::from_millis(ms));
    }
    let pause = live_config.throttle_interval;

    let bus = Arc::new(EventBus::<CounterEvent>::new());
    let registry = LiveQueryRegistry::new(LiveQueryEngine::new(bus.clone(), live_config));
    let store = Arc::new(AtomicI64::new(0));
    registry.register(CounterSource::new(store.clone()))?;

    let limiter = build_limiter(cli.redis).await;
    let limit_key = format!("publish:{}", cli.scope);

    let mut active = registry
        .start("counter", json!({ "scope": cli.scope }))
        .context("starting counter query")?;
    let query_id = active.id();
    let printer = tokio::spawn(async move {
        while let Some(item) = active.updates.next().await {
            let update = item?;
            println!("{}", serde_json::to_string(&update)?);
        }
        anyhow::Ok(())
    });

    let restart_at = cli.events / 2;
    let mut published = 0u32;
    for i in 1..=cli.events {
        if limiter.check(&limit_key).await {
            warn!(scope = %cli.scope, increment = i, "Increment rejected by rate limiter");
        } else {
            store.fetch_add(1, Ordering::SeqCst);
            bus.emit(&cli.scope, CounterEvent::CounterIncremented { delta: 1 });
            published += 1;
        }

        if i == restart_at {
            info!(scope = %cli.scope, "Publishing restart");
            bus.publish_restart(&cli.scope);
        }
        if cli.burst_every > 0 && i % cli.burst_every == 0 {
            tokio::time::sleep(pause).await;
        }
    }

    // let the trailing throttled update through before closing
    tokio::time::sleep(pause * 2).await;
    registry.cancel(query_id);
    printer.await.context("printer task panicked")??;

    info!(
        published,
        final_count = store.load(Ordering::SeqCst),
        bus = ?bus.stats(),
        "Demo finished"
    );
    Ok(())
}

async fn build_limiter(use_redis: bool) -> RateLimiter {
    let config = RateLimitConfig::from_env();
    if use_redis {
        if let Some(store) = RedisCounterStore::from_env().await {
            return RateLimiter::new(Arc::new(store), config);
        }
        warn!("Falling back to in-memory rate limiting");
    }
    RateLimiter::in_memory(config)
}
