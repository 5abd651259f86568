//! # beacon-limit
//!
//! Fixed-window rate limiting for admission checks on hot paths.
//!
//! [`RateLimiter`] counts requests per key in a [`CounterStore`]:
//! [`MemoryCounterStore`] for a single process, [`RedisCounterStore`] when the
//! budget must be shared across processes.

pub mod limiter;
pub mod redis_store;
pub mod store;

pub use limiter::RateLimiter;
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, MemoryCounterStore};
