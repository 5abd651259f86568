//! # beacon-live
//!
//! Live queries: a snapshot followed by reducer-driven updates, delivered as a
//! stream and resynchronized on restart events.
//!
//! - [`LiveSource`]: topics, snapshot loader and reducer for one query kind
//! - [`LiveQueryEngine`]: runs sources against an [`beacon_core::EventBus`]
//! - [`LiveQuery`] / [`LiveQueryHandle`]: the update stream and its controls
//! - [`LiveQueryRegistry`]: name-addressed queries with JSON params and state

pub mod engine;
pub mod query;
pub mod registry;
pub mod source;

pub use engine::LiveQueryEngine;
pub use query::{LiveQuery, LiveQueryHandle, LiveUpdate, Phase};
pub use registry::{ActiveQuery, LiveQueryRegistry};
pub use source::{LiveSource, Reduction};
