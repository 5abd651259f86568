//! Demo live query: a per-scope counter held in a shared store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use beacon_core::{Result, Topic, TopicPayload};
use beacon_live::{LiveSource, Reduction};

pub const COUNTER_INCREMENTED: &str = "counter-incremented";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CounterEvent {
    CounterIncremented { delta: i64 },
}

impl TopicPayload for CounterEvent {
    fn kind(&self) -> &'static str {
        match self {
            CounterEvent::CounterIncremented { .. } => COUNTER_INCREMENTED,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterParams {
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counter {
    pub count: i64,
}

/// Reads the counter from `store` on load and adds deltas on events.
///
/// Writers update `store` before publishing, so a restart reload converges on
/// the same value the reducer reached.
pub struct CounterSource {
    store: Arc<AtomicI64>,
}

impl CounterSource {
    pub fn new(store: Arc<AtomicI64>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LiveSource for CounterSource {
    type Params = CounterParams;
    type State = Counter;
    type Payload = CounterEvent;

    fn name(&self) -> &str {
        "counter"
    }

    fn topics(&self, params: &CounterParams) -> Vec<Topic> {
        vec![Topic::new(COUNTER_INCREMENTED, params.scope.clone())]
    }

    async fn load(&self, _params: &CounterParams) -> Result<Counter> {
        Ok(Counter {
            count: self.store.load(Ordering::SeqCst),
        })
    }

    fn reduce(
        &self,
        _params: &CounterParams,
        state: &Counter,
        _topic: &Topic,
        event: &CounterEvent,
    ) -> Result<Reduction<Counter>> {
        let CounterEvent::CounterIncremented { delta } = event;
        if *delta == 0 {
            return Ok(Reduction::Unchanged);
        }
        Ok(Reduction::Updated(Counter {
            count: state.count + delta,
        }))
    }
}
