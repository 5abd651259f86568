//! The two collaborator interfaces a live query is built from.

use async_trait::async_trait;

use beacon_core::{Result, Topic, TopicPayload};

/// Outcome of folding one event into the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction<S> {
    /// The event does not change what the client sees; nothing is emitted.
    Unchanged,
    /// New state, emitted downstream (subject to throttling).
    Updated(S),
}

impl<S> Reduction<S> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Reduction::Unchanged)
    }
}

/// A named live query: which topics it watches, how to load a snapshot, and
/// how to fold events into it.
///
/// Implementations are shared across every running instance of the query, so
/// per-subscription data belongs in `Params`.
#[async_trait]
pub trait LiveSource: Send + Sync + 'static {
    /// Per-subscription parameters (e.g. the user or thread being watched).
    type Params: Clone + Send + Sync + 'static;
    /// State emitted to the client.
    type State: Clone + Send + Sync + 'static;
    /// Payload catalog of the bus this query listens on.
    type Payload: TopicPayload;

    /// Query name used by the registry and in logs.
    fn name(&self) -> &str;

    /// Topics to subscribe to for `params`.
    ///
    /// The engine adds the restart topic of every scope listed here.
    fn topics(&self, params: &Self::Params) -> Vec<Topic>;

    /// Snapshot loader. Called once at start and again on every restart.
    async fn load(&self, params: &Self::Params) -> Result<Self::State>;

    /// Reducer. Errors are logged and treated as [`Reduction::Unchanged`].
    fn reduce(
        &self,
        params: &Self::Params,
        state: &Self::State,
        topic: &Topic,
        payload: &Self::Payload,
    ) -> Result<Reduction<Self::State>>;
}
