//! Named live queries with JSON parameters and JSON state.
//!
//! The registry is the entry point a transport layer talks to: it looks a
//! source up by name, decodes the client's parameters and returns a stream of
//! serialized updates plus a handle, tracking every running query by id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use beacon_core::{Error, Result, TopicPayload};

use crate::engine::LiveQueryEngine;
use crate::query::{LiveQueryHandle, LiveUpdate};
use crate::source::LiveSource;

/// A query started through the registry.
pub struct ActiveQuery {
    pub handle: LiveQueryHandle,
    /// Updates with the state serialized to JSON. Dropping it cancels the query.
    pub updates: BoxStream<'static, Result<LiveUpdate<Value>>>,
}

impl ActiveQuery {
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }
}

impl std::fmt::Debug for ActiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveQuery")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

trait ErasedSource<P: TopicPayload>: Send + Sync {
    fn start(&self, engine: &LiveQueryEngine<P>, params: Value) -> Result<ActiveQuery>;
}

struct Typed<S>(Arc<S>);

impl<S> ErasedSource<S::Payload> for Typed<S>
where
    S: LiveSource,
    S::Params: DeserializeOwned,
    S::State: Serialize,
{
    fn start(&self, engine: &LiveQueryEngine<S::Payload>, params: Value) -> Result<ActiveQuery> {
        let params: S::Params = serde_json::from_value(params).map_err(|e| {
            Error::InvalidInput(format!("invalid params for '{}': {}", self.0.name(), e))
        })?;
        let query = engine.start(Arc::clone(&self.0), params);
        let handle = query.handle();
        let updates = query
            .map(|item| {
                item.and_then(|update| {
                    update.try_map(|state| serde_json::to_value(state).map_err(Error::from))
                })
            })
            .boxed();
        Ok(ActiveQuery { handle, updates })
    }
}

/// Registry of live query sources, keyed by [`LiveSource::name`].
pub struct LiveQueryRegistry<P: TopicPayload> {
    engine: LiveQueryEngine<P>,
    sources: RwLock<HashMap<String, Arc<dyn ErasedSource<P>>>>,
    running: RwLock<HashMap<Uuid, LiveQueryHandle>>,
}

impl<P: TopicPayload> LiveQueryRegistry<P> {
    pub fn new(engine: LiveQueryEngine<P>) -> Self {
        Self {
            engine,
            sources: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &LiveQueryEngine<P> {
        &self.engine
    }

    /// Register a source under its name.
    ///
    /// Fails with [`Error::InvalidInput`] if the name is already taken.
    pub fn register<S>(&self, source: S) -> Result<()>
    where
        S: LiveSource<Payload = P>,
        S::Params: DeserializeOwned,
        S::State: Serialize,
    {
        let name = source.name().to_string();
        let mut sources = self.sources.write().map_err(|_| lock_poisoned())?;
        if sources.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "live query '{}' is already registered",
                name
            )));
        }
        sources.insert(name.clone(), Arc::new(Typed(Arc::new(source))));
        debug!(query = %name, "Live query source registered");
        Ok(())
    }

    /// Start the query registered as `name` with JSON `params`.
    pub fn start(&self, name: &str, params: Value) -> Result<ActiveQuery> {
        let source = self
            .sources
            .read()
            .map_err(|_| lock_poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("unknown live query '{}'", name)))?;

        let active = source.start(&self.engine, params)?;
        let mut running = self.running.write().map_err(|_| lock_poisoned())?;
        prune_closed(&mut running);
        running.insert(active.id(), active.handle.clone());
        trace!(query_id = %active.id(), query = name, "Live query tracked");
        Ok(active)
    }

    /// Cancel a running query by id. Returns false if it is unknown or
    /// already closed.
    pub fn cancel(&self, query_id: Uuid) -> bool {
        let handle = match self.running.write() {
            Ok(mut running) => {
                let handle = running.remove(&query_id);
                prune_closed(&mut running);
                handle
            }
            Err(_) => return false,
        };
        match handle {
            Some(handle) if !handle.is_closed() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Running queries started through this registry. Forgets closed ones.
    pub fn active_count(&self) -> usize {
        self.running
            .write()
            .map(|mut running| {
                prune_closed(&mut running);
                running.len()
            })
            .unwrap_or(0)
    }

    /// Registered source names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl<P: TopicPayload> std::fmt::Debug for LiveQueryRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueryRegistry")
            .field("names", &self.names())
            .field("active", &self.active_count())
            .finish()
    }
}

/// Drop handles of queries that closed on their own (handle cancel, stream
/// drop, snapshot failure).
fn prune_closed(running: &mut HashMap<Uuid, LiveQueryHandle>) {
    let before = running.len();
    running.retain(|_, handle| !handle.is_closed());
    if running.len() < before {
        trace!(pruned = before - running.len(), "Closed live queries forgotten");
    }
}

fn lock_poisoned() -> Error {
    Error::Internal("live query registry lock poisoned".to_string())
}
