//! Unbounded multi-producer, single-consumer channel with a one-slot waiter.
//!
//! Producers call [`Channel::push`] from any task; the single consumer awaits
//! [`Channel::next`]. When the consumer is already waiting, a push hands the
//! item straight to it without touching the queue. One `std::sync::Mutex`
//! guards the queue, the waiter slot and the closed flag, and is only ever
//! held for O(1) work, never across an `.await`.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier, used as the bus registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

struct ChannelState<T> {
    queue: VecDeque<T>,
    waiter: Option<oneshot::Sender<Option<T>>>,
    /// A waiting `Next` exists and has not completed or been dropped. Stays
    /// set after `push` hands that future its item.
    outstanding: bool,
    closed: bool,
}

/// Single-consumer async queue. See the module docs.
pub struct Channel<T> {
    id: ChannelId,
    state: Mutex<ChannelState<T>>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                waiter: None,
                outstanding: false,
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        // The critical sections never panic midway, so a poisoned lock still
        // guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `item` to the consumer. Never blocks.
    ///
    /// Returns `false` if the channel is closed, in which case the item is
    /// dropped. Producers racing with teardown are expected, so this is not an
    /// error.
    pub fn push(&self, mut item: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        if let Some(waiter) = state.waiter.take() {
            match waiter.send(Some(item)) {
                Ok(()) => return true,
                // The waiting future was dropped; keep the item for the next call.
                Err(Some(returned)) => item = returned,
                Err(None) => return true,
            }
        }
        state.queue.push_back(item);
        true
    }

    /// Wait for the next item. Resolves to `None` once the channel is closed
    /// and its queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if another `next()` future of this channel is still pending.
    /// A channel has exactly one consumer.
    pub fn next(&self) -> Next<'_, T> {
        let mut state = self.lock();
        if state.outstanding {
            drop(state);
            panic!(
                "Channel::next called while a previous next() is still pending ({})",
                self.id
            );
        }

        if let Some(item) = state.queue.pop_front() {
            return Next {
                channel: self,
                state: NextState::Ready(Some(item)),
            };
        }
        if state.closed {
            return Next {
                channel: self,
                state: NextState::Ready(None),
            };
        }

        let (tx, rx) = oneshot::channel();
        state.waiter = Some(tx);
        state.outstanding = true;
        Next {
            channel: self,
            state: NextState::Waiting(rx),
        }
    }

    /// Close the channel permanently.
    ///
    /// Wakes a pending `next()` with `None`. Items already queued stay
    /// available to [`Channel::drain`]. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(None);
        }
    }

    /// Remove and return every queued item without waiting.
    pub fn drain(&self) -> Vec<T> {
        self.lock().queue.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued, undelivered items.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn requeue_front(&self, item: T) {
        self.lock().queue.push_front(item);
    }

    fn release_waiter(&self) {
        self.lock().outstanding = false;
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("queued", &state.queue.len())
            .field("waiting", &state.waiter.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

enum NextState<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<Option<T>>),
    Done,
}

/// Future returned by [`Channel::next`].
///
/// Cancel-safe: dropping it before completion returns any item it was already
/// handed to the front of the queue.
#[must_use = "futures do nothing unless polled"]
pub struct Next<'a, T> {
    channel: &'a Channel<T>,
    state: NextState<T>,
}

// Never pin-projected; the receiver is Unpin and items are moved out by value.
impl<T> Unpin for Next<'_, T> {}

impl<T> Future for Next<'_, T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match std::mem::replace(&mut this.state, NextState::Done) {
            NextState::Ready(item) => Poll::Ready(item),
            NextState::Waiting(mut rx) => match Pin::new(&mut rx).poll(cx) {
                Poll::Ready(Ok(item)) => {
                    this.channel.release_waiter();
                    Poll::Ready(item)
                }
                // Sender dropped without a value: the channel itself is gone.
                Poll::Ready(Err(_)) => {
                    this.channel.release_waiter();
                    Poll::Ready(None)
                }
                Poll::Pending => {
                    this.state = NextState::Waiting(rx);
                    Poll::Pending
                }
            },
            NextState::Done => panic!("Next polled after completion"),
        }
    }
}

impl<T> Drop for Next<'_, T> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, NextState::Done) {
            NextState::Ready(Some(item)) => self.channel.requeue_front(item),
            NextState::Waiting(mut rx) => {
                // Closing first makes a racing push keep its item instead.
                rx.close();
                let mut state = self.channel.lock();
                state.outstanding = false;
                if let Ok(Some(item)) = rx.try_recv() {
                    state.queue.push_front(item);
                }
            }
            NextState::Ready(None) | NextState::Done => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_when_pushed_before_next() {
        let channel = Channel::new();
        channel.push(1);
        channel.push(2);
        channel.push(3);

        assert_eq!(channel.next().await, Some(1));
        assert_eq!(channel.next().await, Some(2));
        assert_eq!(channel.next().await, Some(3));
    }

    #[tokio::test]
    async fn test_fifo_when_interleaved_with_waiting_consumer() {
        let channel = Arc::new(Channel::new());

        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..3 {
                    seen.push(channel.next().await.unwrap());
                }
                seen
            })
        };

        for i in 1..=3 {
            tokio::task::yield_now().await;
            channel.push(i);
        }

        assert_eq!(consumer.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_push_hands_off_to_waiter_without_queueing() {
        let channel = Channel::new();
        let next = channel.next();
        assert!(channel.push("direct"));
        assert_eq!(channel.len(), 0);
        assert_eq!(next.await, Some("direct"));
    }

    #[tokio::test]
    #[should_panic(expected = "previous next() is still pending")]
    async fn test_second_outstanding_next_panics() {
        let channel: Channel<u32> = Channel::new();
        let _first = channel.next();
        let _second = channel.next();
    }

    #[tokio::test]
    #[should_panic(expected = "previous next() is still pending")]
    async fn test_second_next_panics_after_push_resolved_the_first() {
        let channel = Channel::new();
        let _first = channel.next();
        // the first future now holds an item but has not been polled
        channel.push(1);
        let _second = channel.next();
    }

    #[tokio::test]
    async fn test_next_allowed_once_pending_future_is_dropped() {
        let channel = Channel::new();
        let first = channel.next();
        channel.push(1);
        drop(first);

        assert_eq!(channel.next().await, Some(1));
        let pending = channel.next();
        channel.push(2);
        assert_eq!(pending.await, Some(2));
    }

    #[tokio::test]
    async fn test_next_after_completed_next_is_allowed() {
        let channel = Channel::new();
        channel.push(1);
        assert_eq!(channel.next().await, Some(1));
        let pending = channel.next();
        channel.push(2);
        assert_eq!(pending.await, Some(2));
        channel.push(3);
        assert_eq!(channel.next().await, Some(3));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter_with_none() {
        let channel = Arc::new(Channel::<u32>::new());
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.next().await })
        };
        tokio::task::yield_now().await;
        channel.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let channel = Channel::new();
        channel.close();
        assert!(!channel.push(1));
        assert!(channel.is_empty());
        assert_eq!(channel.next().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let channel = Channel::<u8>::new();
        channel.close();
        channel.close();
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_queued_items_survive_close_until_drained() {
        let channel = Channel::new();
        channel.push(1);
        channel.push(2);
        channel.close();
        assert_eq!(channel.drain(), vec![1, 2]);
        assert_eq!(channel.next().await, None);
    }

    #[test]
    fn test_drain_empties_queue() {
        let channel = Channel::new();
        channel.push('a');
        channel.push('b');
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.drain(), vec!['a', 'b']);
        assert!(channel.is_empty());
        assert!(channel.drain().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_next_returns_handed_item_to_queue() {
        let channel = Channel::new();
        let pending = channel.next();
        channel.push(7);
        drop(pending);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.next().await, Some(7));
    }

    #[tokio::test]
    async fn test_dropped_ready_next_requeues_item() {
        let channel = Channel::new();
        channel.push(1);
        channel.push(2);
        drop(channel.next());
        assert_eq!(channel.drain(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_next_cancelled_by_timeout_then_retried() {
        let channel = Channel::<u32>::new();
        let timed_out = tokio::time::timeout(Duration::from_millis(5), channel.next()).await;
        assert!(timed_out.is_err());
        channel.push(9);
        assert_eq!(channel.next().await, Some(9));
    }

    #[test]
    fn test_channel_ids_are_unique() {
        let a = Channel::<u8>::new();
        let b = Channel::<u8>::new();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("ch-"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_producers_single_consumer() {
        let channel = Arc::new(Channel::new());
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let channel = channel.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    channel.push((p, i));
                }
            }));
        }

        let mut last_seen = [None::<u32>; 4];
        for _ in 0..400 {
            let (p, i) = channel.next().await.unwrap();
            // per-producer order is preserved
            if let Some(prev) = last_seen[p as usize] {
                assert!(i > prev);
            }
            last_seen[p as usize] = Some(i);
        }
        for producer in producers {
            producer.await.unwrap();
        }
        assert!(channel.is_empty());
    }
}
