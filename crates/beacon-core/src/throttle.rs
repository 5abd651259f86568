//! Callback throttling with guaranteed trailing delivery.
//!
//! [`Throttle::call`] fires the callback at most once per interval. The first
//! call after a quiet period fires immediately; calls inside the interval are
//! coalesced and the latest arguments fire when the interval elapses.
//! Intermediate arguments may be skipped, the final ones never are.
//!
//! Timing uses `tokio::time::Instant`, so tests can run on a paused clock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

type Callback<A> = Box<dyn Fn(A) + Send + Sync>;

struct ThrottleState<A> {
    last_fire: Option<Instant>,
    pending: Option<A>,
    timer: Option<JoinHandle<()>>,
    /// Bumped by `cancel` so a timer that already woke up cannot fire stale args.
    generation: u64,
}

struct Inner<A> {
    interval: Duration,
    callback: Callback<A>,
    state: Mutex<ThrottleState<A>>,
}

impl<A> Inner<A> {
    fn lock(&self) -> MutexGuard<'_, ThrottleState<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire_pending(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.timer = None;
        if let Some(args) = state.pending.take() {
            state.last_fire = Some(Instant::now());
            (self.callback)(args);
        }
    }
}

/// Throttled callback. See the module docs.
///
/// The callback runs while the throttle's internal lock is held, so emissions
/// and [`Throttle::cancel`] are totally ordered. It must not call back into
/// the same throttle.
pub struct Throttle<A> {
    inner: Arc<Inner<A>>,
}

impl<A: Send + 'static> Throttle<A> {
    pub fn new<F>(interval: Duration, callback: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                interval,
                callback: Box::new(callback),
                state: Mutex::new(ThrottleState {
                    last_fire: None,
                    pending: None,
                    timer: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Fire now if the interval has elapsed, otherwise schedule the latest args.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call(&self, args: A) {
        let mut state = self.inner.lock();
        let now = Instant::now();
        let interval = self.inner.interval;

        let due = state
            .last_fire
            .map_or(true, |last| now.duration_since(last) >= interval);
        if due && state.timer.is_none() {
            state.last_fire = Some(now);
            (self.inner.callback)(args);
            return;
        }

        state.pending = Some(args);
        if state.timer.is_none() {
            let deadline = state.last_fire.map_or(now, |last| last + interval);
            let generation = state.generation;
            let inner = Arc::clone(&self.inner);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                inner.fire_pending(generation);
            }));
        }
    }

    /// Drop pending args and the scheduled timer without firing.
    ///
    /// Once this returns, no earlier call can fire. The throttle stays usable.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        state.generation = state.generation.wrapping_add(1);
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// Whether a trailing fire is scheduled.
    pub fn has_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

impl<A> fmt::Debug for Throttle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Throttle")
            .field("interval", &self.inner.interval)
            .field("pending", &state.pending.is_some())
            .field("timer", &state.timer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn recording_throttle(interval_ms: u64) -> (Throttle<u32>, Arc<Mutex<Vec<u32>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let throttle = Throttle::new(Duration::from_millis(interval_ms), move |v| {
            sink.lock().unwrap().push(v);
        });
        (throttle, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_fires_immediately() {
        let (throttle, fired) = recording_throttle(100);
        throttle.call(1);
        assert_eq!(*fired.lock().unwrap(), vec![1]);
        assert!(!throttle.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_latest() {
        let (throttle, fired) = recording_throttle(100);
        for i in 1..=10 {
            throttle.call(i);
            sleep(Duration::from_millis(5)).await;
        }
        sleep(Duration::from_millis(200)).await;

        let fired = fired.lock().unwrap().clone();
        assert!(fired.len() <= 2, "fired {:?}", fired);
        assert_eq!(fired.last(), Some(&10));
        assert_eq!(fired.first(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_fire_waits_for_interval() {
        let (throttle, fired) = recording_throttle(100);
        throttle.call(1);
        sleep(Duration::from_millis(10)).await;
        throttle.call(2);
        assert!(throttle.has_pending());

        sleep(Duration::from_millis(80)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1]);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);
        assert!(!throttle.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_fires_immediately_again() {
        let (throttle, fired) = recording_throttle(100);
        throttle.call(1);
        sleep(Duration::from_millis(150)).await;
        throttle.call(2);
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_stream_is_sampled_per_interval() {
        // 8 calls 20ms apart with a 55ms interval:
        // 0 fires at 0ms, 2 at 55ms, 5 at 110ms, 7 at 165ms.
        let (throttle, fired) = recording_throttle(55);
        for i in 0..8 {
            throttle.call(i);
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock().unwrap(), vec![0, 2, 5, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_without_firing() {
        let (throttle, fired) = recording_throttle(100);
        throttle.call(1);
        throttle.call(2);
        throttle.call(3);
        throttle.cancel();
        assert!(!throttle.has_pending());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usable_after_cancel() {
        let (throttle, fired) = recording_throttle(100);
        throttle.call(1);
        throttle.call(2);
        throttle.cancel();
        throttle.call(3);
        sleep(Duration::from_millis(150)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (throttle, fired) = recording_throttle(100);
        throttle.cancel();
        throttle.cancel();
        throttle.call(1);
        assert_eq!(*fired.lock().unwrap(), vec![1]);
    }
}
