//! Live query engine.
//!
//! Each started query owns one event channel subscribed to the source's topics
//! plus the restart topic of every scope those topics cover. A spawned task
//! loads the snapshot, then folds delivered events through the reducer and
//! pushes changed state through a [`Throttle`]. A restart event cancels any
//! pending throttled update and reloads the snapshot.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use beacon_core::{
    restart_topics, Error, EventBody, EventBus, EventChannel, LiveQueryConfig, Throttle, Topic,
    TopicPayload,
};

use crate::query::{LiveQuery, LiveQueryHandle, Outbox, Phase, QueryControl};
use crate::source::{LiveSource, Reduction};

/// Starts live queries against one event bus.
pub struct LiveQueryEngine<P: TopicPayload> {
    bus: Arc<EventBus<P>>,
    config: LiveQueryConfig,
    active: Arc<AtomicUsize>,
}

impl<P: TopicPayload> Clone for LiveQueryEngine<P> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            config: self.config.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<P: TopicPayload> LiveQueryEngine<P> {
    pub fn new(bus: Arc<EventBus<P>>, config: LiveQueryConfig) -> Self {
        Self {
            bus,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus<P>> {
        &self.bus
    }

    pub fn config(&self) -> &LiveQueryConfig {
        &self.config
    }

    /// Queries started by this engine (or its clones) that are not yet closed.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Start a live query.
    ///
    /// Topic subscriptions are in place when this returns, before the snapshot
    /// is loaded: events published from here on are folded into the state
    /// once the snapshot arrives. Must be called from within a tokio runtime.
    pub fn start<S>(&self, source: Arc<S>, params: S::Params) -> LiveQuery<S::State>
    where
        S: LiveSource<Payload = P>,
    {
        let id = Uuid::now_v7();
        let name = source.name().to_string();

        let mut seen = HashSet::new();
        let mut topics: Vec<Topic> = source
            .topics(&params)
            .into_iter()
            .filter(|topic| seen.insert(topic.clone()))
            .collect();
        for restart in restart_topics(&topics) {
            if seen.insert(restart.clone()) {
                topics.push(restart);
            }
        }

        let channel: Arc<EventChannel<P>> = Arc::new(EventChannel::new());
        for topic in &topics {
            self.bus.subscribe(topic, &channel);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox::new(id, tx));
        let throttle = {
            let outbox = Arc::clone(&outbox);
            Throttle::new(self.config.throttle_interval, move |state| {
                outbox.send_update(state);
            })
        };
        let (phase, _) = watch::channel(Phase::Initializing);

        self.active.fetch_add(1, Ordering::AcqRel);
        let core = Arc::new(QueryCore {
            id,
            name,
            bus: Arc::clone(&self.bus),
            channel,
            topics,
            throttle,
            outbox,
            phase,
            closed: AtomicBool::new(false),
            active: Arc::clone(&self.active),
            task: Mutex::new(None),
        });

        info!(
            query_id = %id,
            query = %core.name,
            topic_count = core.topics.len(),
            channel_id = %core.channel.id(),
            "Live query opened"
        );

        let span = info_span!("live_query", query_id = %id, query = %core.name);
        let task = tokio::spawn(run(Arc::clone(&core), source, params).instrument(span));
        core.set_task(task);

        LiveQuery::new(LiveQueryHandle::new(core), rx)
    }
}

impl<P: TopicPayload> std::fmt::Debug for LiveQueryEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueryEngine")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish()
    }
}

/// Shared state of one running query, owned jointly by its task and handles.
struct QueryCore<P: TopicPayload, S> {
    id: Uuid,
    name: String,
    bus: Arc<EventBus<P>>,
    channel: Arc<EventChannel<P>>,
    topics: Vec<Topic>,
    throttle: Throttle<S>,
    outbox: Arc<Outbox<S>>,
    phase: watch::Sender<Phase>,
    closed: AtomicBool,
    active: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: TopicPayload, S: Send + 'static> QueryCore<P, S> {
    fn set_task(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            task.abort();
        } else {
            *slot = Some(task);
        }
    }

    /// Move to `next` unless already closed.
    fn set_phase(&self, next: Phase) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Closed || *phase == next {
                return false;
            }
            *phase = next;
            true
        });
    }
}

impl<P: TopicPayload, S: Send + 'static> QueryControl for QueryCore<P, S> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn teardown(&self, reason: &'static str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.channel.close();
        let removed = self
            .topics
            .iter()
            .filter(|topic| self.bus.unsubscribe(topic, &self.channel))
            .count();
        self.throttle.cancel();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.phase.send_replace(Phase::Closed);
        // last, so a consumer that sees the stream end observes a closed query
        self.outbox.close();

        info!(
            query_id = %self.id,
            query = %self.name,
            reason,
            unsubscribed = removed,
            "Live query closed"
        );
    }

    fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }
}

/// Tears the query down when the task exits by any path, including a panic
/// inside the source or an abort.
struct TeardownOnExit<P: TopicPayload, S: Send + 'static>(Arc<QueryCore<P, S>>);

impl<P: TopicPayload, S: Send + 'static> Drop for TeardownOnExit<P, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // no-op if the query was already closed
            self.0
                .outbox
                .send_error(Error::Internal("live query task panicked".to_string()));
            self.0.teardown("task panicked");
        } else {
            self.0.teardown("task ended");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

async fn run<S: LiveSource>(
    core: Arc<QueryCore<S::Payload, S::State>>,
    source: Arc<S>,
    params: S::Params,
) {
    let _teardown = TeardownOnExit(Arc::clone(&core));

    let Some(mut state) = load_snapshot(&core, source.as_ref(), &params).await else {
        return;
    };

    while let Some(event) = core.channel.next().await {
        match &event.body {
            EventBody::Restart => {
                debug!(scope = event.topic.scope(), "Restart received, reloading snapshot");
                core.throttle.cancel();
                match load_snapshot(&core, source.as_ref(), &params).await {
                    Some(fresh) => state = fresh,
                    None => return,
                }
            }
            EventBody::Domain(payload) => {
                let reduced = panic::catch_unwind(AssertUnwindSafe(|| {
                    source.reduce(&params, &state, &event.topic, payload)
                }));
                match reduced {
                    Ok(Ok(Reduction::Unchanged)) => {
                        trace!(topic = %event.topic, "Event left state unchanged");
                    }
                    Ok(Ok(Reduction::Updated(next))) => {
                        core.throttle.call(next.clone());
                        state = next;
                    }
                    Ok(Err(e)) => {
                        warn!(topic = %event.topic, error = %e, "Reducer failed, event skipped");
                    }
                    Err(panic) => {
                        warn!(
                            topic = %event.topic,
                            error = panic_message(panic.as_ref()),
                            "Reducer panicked, event skipped"
                        );
                    }
                }
            }
        }
    }
}

/// Load and emit a snapshot. On failure the error is surfaced on the stream
/// and the query is torn down.
async fn load_snapshot<S: LiveSource>(
    core: &QueryCore<S::Payload, S::State>,
    source: &S,
    params: &S::Params,
) -> Option<S::State> {
    core.set_phase(Phase::Initializing);
    match source.load(params).await {
        Ok(state) => {
            core.outbox.send_snapshot(state.clone());
            core.set_phase(Phase::Streaming);
            Some(state)
        }
        Err(e) => {
            warn!(error = %e, "Snapshot load failed, closing live query");
            core.outbox.send_error(e);
            core.teardown("snapshot failed");
            None
        }
    }
}
