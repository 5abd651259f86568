//! # beacon-core
//!
//! Delivery primitives for beacon live queries.
//!
//! This crate provides:
//! - [`Topic`]: (event kind, scope key) routing keys
//! - [`Channel`]: multi-producer, single-consumer async queue
//! - [`EventBus`]: topic-scoped publish/subscribe registry
//! - [`Throttle`]: at-most-once-per-interval callbacks with trailing delivery
//! - Shared errors, defaults, configuration and logging setup

pub mod bus;
pub mod channel;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod throttle;
pub mod topic;

// Re-export commonly used types at crate root
pub use bus::{BusStats, EventBus, EventChannel};
pub use channel::{Channel, ChannelId, Next};
pub use config::{LiveQueryConfig, LogConfig, LogFormat, RateLimitConfig};
pub use error::{Error, Result};
pub use events::{DomainEvent, Event, EventBody, PresenceChange};
pub use throttle::Throttle;
pub use topic::{restart_topics, Topic, TopicPayload};
