//! Client-facing side of a running live query: the update stream and its
//! cancellation handle.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::trace;
use uuid::Uuid;

use beacon_core::{Error, Result};

/// One value emitted by a live query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveUpdate<S> {
    pub query_id: Uuid,
    /// Position in this query's output, starting at 0.
    pub sequence: u64,
    /// True for snapshots (initial load and every restart reload), false for
    /// reducer output.
    pub complete: bool,
    pub state: S,
}

impl<S> LiveUpdate<S> {
    /// Convert the state, keeping id, sequence and completeness.
    pub fn try_map<T, E>(
        self,
        f: impl FnOnce(S) -> std::result::Result<T, E>,
    ) -> std::result::Result<LiveUpdate<T>, E> {
        Ok(LiveUpdate {
            query_id: self.query_id,
            sequence: self.sequence,
            complete: self.complete,
            state: f(self.state)?,
        })
    }
}

/// Lifecycle of a live query.
///
/// `Initializing` is re-entered while a restart reloads the snapshot.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Streaming,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Initializing => "initializing",
            Phase::Streaming => "streaming",
            Phase::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

type UpdateSender<S> = mpsc::UnboundedSender<Result<LiveUpdate<S>>>;

struct OutboxState<S> {
    tx: Option<UpdateSender<S>>,
    next_sequence: u64,
}

/// Ordered output of one query.
///
/// Sequence numbers are assigned and items sent under one lock, so the stream
/// order always matches the sequence order. Once closed, sends are dropped.
pub(crate) struct Outbox<S> {
    query_id: Uuid,
    state: Mutex<OutboxState<S>>,
}

impl<S> Outbox<S> {
    pub(crate) fn new(query_id: Uuid, tx: UpdateSender<S>) -> Self {
        Self {
            query_id,
            state: Mutex::new(OutboxState {
                tx: Some(tx),
                next_sequence: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn send_snapshot(&self, state: S) -> bool {
        self.send(true, state)
    }

    pub(crate) fn send_update(&self, state: S) -> bool {
        self.send(false, state)
    }

    fn send(&self, complete: bool, state: S) -> bool {
        let mut guard = self.lock();
        let sequence = guard.next_sequence;
        let Some(tx) = guard.tx.as_ref() else {
            return false;
        };
        let update = LiveUpdate {
            query_id: self.query_id,
            sequence,
            complete,
            state,
        };
        if tx.send(Ok(update)).is_err() {
            // receiver dropped; the query is being torn down
            guard.tx = None;
            return false;
        }
        guard.next_sequence += 1;
        trace!(query_id = %self.query_id, sequence, complete, "Update emitted");
        true
    }

    /// Surface a fatal error as the last item of the stream.
    pub(crate) fn send_error(&self, error: Error) {
        if let Some(tx) = self.lock().tx.as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// Drop the sender so the stream ends after draining buffered items.
    pub(crate) fn close(&self) {
        self.lock().tx = None;
    }
}

/// Control surface the handle needs from a running query, independent of the
/// payload and state types.
pub(crate) trait QueryControl: Send + Sync {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
    fn teardown(&self, reason: &'static str);
    fn phase_watch(&self) -> watch::Receiver<Phase>;
}

/// Cloneable handle to a running live query.
#[derive(Clone)]
pub struct LiveQueryHandle {
    control: Arc<dyn QueryControl>,
}

impl LiveQueryHandle {
    pub(crate) fn new(control: Arc<dyn QueryControl>) -> Self {
        Self { control }
    }

    pub fn id(&self) -> Uuid {
        self.control.id()
    }

    /// Name of the source the query was started from.
    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Stop the query.
    ///
    /// Closes the event channel, removes every bus subscription, discards any
    /// pending throttled update and ends the stream. Safe to call any number
    /// of times, from any phase.
    pub fn cancel(&self) {
        self.control.teardown("cancelled");
    }

    pub fn phase(&self) -> Phase {
        *self.control.phase_watch().borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Receiver that observes phase transitions.
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.control.phase_watch()
    }

    /// Wait until the query reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.phase_watch();
        // Err means the query state is gone, which only happens after teardown
        let _ = rx.wait_for(|phase| *phase == Phase::Closed).await;
    }
}

impl fmt::Debug for LiveQueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQueryHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Stream of updates from a live query.
///
/// Yields the snapshot first, then reducer output, with a fresh snapshot
/// after every restart. A failed snapshot load is yielded as the final `Err`
/// item. Dropping the stream cancels the query.
pub struct LiveQuery<S> {
    handle: LiveQueryHandle,
    rx: mpsc::UnboundedReceiver<Result<LiveUpdate<S>>>,
}

impl<S> LiveQuery<S> {
    pub(crate) fn new(
        handle: LiveQueryHandle,
        rx: mpsc::UnboundedReceiver<Result<LiveUpdate<S>>>,
    ) -> Self {
        Self { handle, rx }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn handle(&self) -> LiveQueryHandle {
        self.handle.clone()
    }

    pub fn phase(&self) -> Phase {
        self.handle.phase()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<S> Stream for LiveQuery<S> {
    type Item = Result<LiveUpdate<S>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<S> Drop for LiveQuery<S> {
    fn drop(&mut self) {
        self.handle.control.teardown("stream dropped");
    }
}

impl<S> fmt::Debug for LiveQuery<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery").field("handle", &self.handle).finish()
    }
}
