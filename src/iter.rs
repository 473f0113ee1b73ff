//! Push-to-pull event iteration
//!
//! `on` registers one listener on an event source and returns an
//! `EventIter` the consumer pulls from. The listener and the consumer share
//! one iteration state:
//!
//! - an event arriving while the consumer waits resolves the waiter directly
//! - otherwise it is appended to the buffer
//! - a request takes from the buffer, or installs the single waiter
//! - stopping (external token, `terminate`, or drop) settles the waiter with
//!   the terminal result, clears the buffer, and releases the listener
//!
//! The waiter and a non-empty buffer never coexist, and each state mutation
//! happens inside a single critical section, so delivery order always equals
//! firing order.

use crate::coordinator::{StopCoordinator, StopOrigin};
use crate::error::{EventError, Result};
use crate::queue::EventQueue;
use crate::source::{EventSource, Listener};
use crate::subscription::Subscription;
use crate::types::{CancelPolicy, OnOptions, Step};
use futures::future::poll_fn;
use std::fmt;
use std::future::{Future, Ready};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_stream::Stream;

static NEXT_ITER_ID: AtomicU64 = AtomicU64::new(1);

type Outcome<E> = Result<Step<E>>;

struct Stopped {
    origin: StopOrigin,
    reason: Option<String>,
}

struct IterState<E> {
    queue: EventQueue<E>,
    waiter: Option<oneshot::Sender<Outcome<E>>>,
    stopped: Option<Stopped>,
}

/// Result of a request against the shared state
enum Request<E> {
    Ready(Outcome<E>),
    Wait(oneshot::Receiver<Outcome<E>>),
}

struct Shared<E> {
    id: u64,
    event_type: String,
    policy: CancelPolicy,
    state: Mutex<IterState<E>>,
}

impl<E> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, IterState<E>> {
        // Every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn terminal(&self, stopped: &Stopped) -> Outcome<E> {
        match (self.policy, stopped.origin) {
            (CancelPolicy::Error, StopOrigin::External) => Err(EventError::Cancelled {
                reason: stopped.reason.clone(),
            }),
            _ => Ok(Step::Done(stopped.reason.clone())),
        }
    }

    /// Producer side: route a fired event to the waiter or the buffer
    fn deliver(&self, event: E) {
        let mut state = self.lock();
        if state.stopped.is_some() {
            return;
        }

        match state.waiter.take() {
            Some(waiter) => {
                // A waiter whose receiver is gone must not swallow the event
                if let Err(Ok(Step::Event(event))) = waiter.send(Ok(Step::Event(event))) {
                    state.queue.push(event);
                }
            }
            None => state.queue.push(event),
        }
    }

    /// Consumer side: take the next buffered event or install the waiter
    fn request(&self) -> Request<E> {
        let mut state = self.lock();
        if let Some(stopped) = &state.stopped {
            return Request::Ready(self.terminal(stopped));
        }

        if let Some(event) = state.queue.pop() {
            return Request::Ready(Ok(Step::Event(event)));
        }

        let (tx, rx) = oneshot::channel();
        state.waiter = Some(tx);
        Request::Wait(rx)
    }

    /// Enter the terminal state; returns false if already stopped
    fn done(&self, origin: StopOrigin, reason: Option<String>) -> bool {
        let (waiter, outcome, dropped) = {
            let mut state = self.lock();
            if state.stopped.is_some() {
                return false;
            }

            let stopped = Stopped { origin, reason };
            let outcome = self.terminal(&stopped);
            state.stopped = Some(stopped);

            let dropped = state.queue.len();
            state.queue.clear();
            (state.waiter.take(), outcome, dropped)
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(outcome);
        }

        tracing::debug!(
            iter_id = self.id,
            event_type = %self.event_type,
            origin = ?origin,
            dropped,
            "Event iterator stopped"
        );
        true
    }
}

/// Create an iterator over events named `event_type` from `source`
///
/// Exactly one listener is registered, with `options.listener` passed
/// through. If `options.listener.cancel` is already cancelled the source is
/// never touched and the iterator starts terminated with that token's
/// reason. An error from the source's registration is returned unchanged.
///
/// # Example
///
/// ```rust
/// use a3s_on::{on, CancelSource, MemoryEventTarget, OnOptions, Step};
///
/// # async fn example() -> a3s_on::Result<()> {
/// let target = MemoryEventTarget::<u32>::new();
/// let stop = CancelSource::new();
/// let mut clicks = on(&target, "click", OnOptions::default().with_cancel(stop.token()))?;
///
/// target.dispatch("click", 1);
/// assert_eq!(clicks.next_step().await?, Step::Event(1));
///
/// stop.cancel_with("closed");
/// assert_eq!(clicks.next_step().await?, Step::Done(Some("closed".to_string())));
/// # Ok(())
/// # }
/// ```
pub fn on<E, S>(source: &S, event_type: &str, options: OnOptions) -> Result<EventIter<E>>
where
    E: Send + 'static,
    S: EventSource<E> + ?Sized,
{
    let OnOptions {
        listener: mut listener_options,
        max_queue_size,
        cancel_policy,
    } = options;

    let shared = Arc::new(Shared {
        id: NEXT_ITER_ID.fetch_add(1, Ordering::Relaxed),
        event_type: event_type.to_string(),
        policy: cancel_policy,
        state: Mutex::new(IterState {
            queue: EventQueue::new(max_queue_size),
            waiter: None,
            stopped: None,
        }),
    });

    let mut coordinator = StopCoordinator::new(listener_options.cancel.take());
    let weak: Weak<Shared<E>> = Arc::downgrade(&shared);
    coordinator.on_stop(move |origin, reason| {
        if let Some(shared) = weak.upgrade() {
            shared.done(origin, reason);
        }
    });

    let weak: Weak<Shared<E>> = Arc::downgrade(&shared);
    let listener: Listener<E> = Arc::new(move |event: E| {
        if let Some(shared) = weak.upgrade() {
            shared.deliver(event);
        }
    });

    let subscription =
        Subscription::subscribe(source, event_type, listener, listener_options, coordinator)?;

    tracing::debug!(
        iter_id = shared.id,
        event_type,
        max_queue_size,
        registered = subscription.is_registered(),
        "Event iterator created"
    );

    Ok(EventIter {
        shared,
        subscription,
        pending: None,
    })
}

/// Pull-based iterator over events from a push-based source
///
/// Consume with `next_step`, or as a `Stream` of events. Dropping the
/// iterator releases its listener.
pub struct EventIter<E> {
    shared: Arc<Shared<E>>,
    subscription: Subscription,
    /// Receiver for the installed waiter, kept across polls
    pending: Option<oneshot::Receiver<Outcome<E>>>,
}

impl<E> EventIter<E> {
    fn poll_step(&mut self, cx: &mut Context<'_>) -> Poll<Outcome<E>> {
        loop {
            if let Some(rx) = self.pending.as_mut() {
                match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(outcome)) => {
                        self.pending = None;
                        return Poll::Ready(outcome);
                    }
                    // Waiter was replaced without being settled; ask again
                    Poll::Ready(Err(_)) => self.pending = None,
                    Poll::Pending => return Poll::Pending,
                }
            }

            match self.shared.request() {
                Request::Ready(outcome) => return Poll::Ready(outcome),
                Request::Wait(rx) => self.pending = Some(rx),
            }
        }
    }

    /// Request the next step
    ///
    /// Resolves immediately with a buffered event or the terminal result;
    /// otherwise suspends until an event fires or the iterator stops. An
    /// error is only returned for external cancellation under
    /// `CancelPolicy::Error`.
    pub async fn next_step(&mut self) -> Result<Step<E>> {
        poll_fn(|cx| self.poll_step(cx)).await
    }

    /// End iteration early
    ///
    /// The listener is released before this returns. A pending request
    /// settles with `Step::Done(reason)`. Calling it again is a no-op apart
    /// from the returned value, which always carries the given reason.
    pub fn terminate(&mut self, reason: Option<String>) -> Ready<Step<E>> {
        self.subscription.unsubscribe(reason.clone());
        std::future::ready(Step::Done(reason))
    }

    /// Whether the iterator has stopped
    pub fn is_terminated(&self) -> bool {
        self.shared.lock().stopped.is_some()
    }

    /// The reason iteration stopped, if it stopped with one
    pub fn stop_reason(&self) -> Option<String> {
        self.shared
            .lock()
            .stopped
            .as_ref()
            .and_then(|s| s.reason.clone())
    }

    /// Number of buffered, unconsumed events
    pub fn buffered(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Whether a listener is still registered with the source
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// The event type this iterator listens for
    pub fn event_type(&self) -> &str {
        &self.shared.event_type
    }
}

impl<E> Stream for EventIter<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        match self.get_mut().poll_step(cx) {
            Poll::Ready(Ok(Step::Event(event))) => Poll::Ready(Some(event)),
            Poll::Ready(Ok(Step::Done(_)) | Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> fmt::Debug for EventIter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("EventIter")
            .field("id", &self.shared.id)
            .field("event_type", &self.shared.event_type)
            .field("buffered", &state.queue.len())
            .field("waiting", &state.waiter.is_some())
            .field("terminated", &state.stopped.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::source::memory::MemoryEventTarget;
    use crate::types::ListenerOptions;
    use tokio_stream::StreamExt;
    use tokio_test::{assert_pending, assert_ready, task};

    fn target() -> MemoryEventTarget<u32> {
        MemoryEventTarget::new()
    }

    #[tokio::test]
    async fn test_buffered_events_in_order() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        for i in 1..=3 {
            target.dispatch("click", i);
        }
        assert_eq!(iter.buffered(), 3);

        for i in 1..=3 {
            assert_eq!(iter.next_step().await.unwrap(), Step::Event(i));
        }
        assert_eq!(iter.buffered(), 0);
    }

    #[test]
    fn test_waiter_resolved_directly() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        {
            let mut next = task::spawn(iter.next_step());
            assert_pending!(next.poll());

            target.dispatch("click", 7);
            assert!(next.is_woken());
            let step = assert_ready!(next.poll()).unwrap();
            assert_eq!(step, Step::Event(7));
        }

        assert_eq!(iter.buffered(), 0);
    }

    #[test]
    fn test_waiter_and_buffer_never_coexist() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        {
            let mut next = task::spawn(iter.next_step());
            assert_pending!(next.poll());
        }
        assert!(iter.shared.lock().waiter.is_some());

        target.dispatch("click", 1);
        let state = iter.shared.lock();
        assert!(state.waiter.is_none());
        assert_eq!(state.queue.len(), 0);
    }

    #[test]
    fn test_abandoned_request_keeps_event() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        {
            let mut next = task::spawn(iter.next_step());
            assert_pending!(next.poll());
        }
        // The receiver survives in the iterator, so the event is not lost
        target.dispatch("click", 5);

        let mut next = task::spawn(iter.next_step());
        assert_eq!(assert_ready!(next.poll()).unwrap(), Step::Event(5));
    }

    #[test]
    fn test_dropped_receiver_falls_back_to_buffer() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        {
            let mut next = task::spawn(iter.next_step());
            assert_pending!(next.poll());
        }
        iter.pending = None;

        target.dispatch("click", 9);
        assert_eq!(iter.buffered(), 1);

        let mut next = task::spawn(iter.next_step());
        assert_eq!(assert_ready!(next.poll()).unwrap(), Step::Event(9));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_registers() {
        let target = target();
        let token = CancelToken::cancelled_with(Some("Oops!".to_string()));
        let mut iter = on(&target, "click", OnOptions::default().with_cancel(token)).unwrap();

        assert_eq!(target.listener_count("click"), 0);
        assert!(!iter.is_subscribed());
        assert_eq!(
            iter.next_step().await.unwrap(),
            Step::Done(Some("Oops!".to_string()))
        );
    }

    #[tokio::test]
    async fn test_external_cancel_settles_waiter() {
        let target = target();
        let stop = CancelSource::new();
        let mut iter = on(&target, "click", OnOptions::default().with_cancel(stop.token())).unwrap();

        let mut next = task::spawn(iter.next_step());
        assert_pending!(next.poll());

        stop.cancel_with("R");
        assert!(next.is_woken());
        assert_eq!(
            assert_ready!(next.poll()).unwrap(),
            Step::Done(Some("R".to_string()))
        );
        drop(next);

        assert_eq!(target.listener_count("click"), 0);
        assert_eq!(iter.stop_reason().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_cancel_clears_buffer() {
        let target = target();
        let stop = CancelSource::new();
        let mut iter = on(&target, "click", OnOptions::default().with_cancel(stop.token())).unwrap();

        target.dispatch("click", 1);
        target.dispatch("click", 2);
        stop.cancel(None);

        assert_eq!(iter.buffered(), 0);
        assert_eq!(iter.next_step().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_terminate_releases_synchronously() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();
        assert_eq!(target.listener_count("click"), 1);

        let done = iter.terminate(Some("finished".to_string()));
        assert_eq!(target.listener_count("click"), 0);
        assert_eq!(done.await, Step::Done(Some("finished".to_string())));

        assert_eq!(target.dispatch("click", 1), 0);
        assert_eq!(
            iter.next_step().await.unwrap(),
            Step::Done(Some("finished".to_string()))
        );
    }

    #[tokio::test]
    async fn test_terminate_twice_is_noop() {
        let target = target();
        let mut iter = on(&target, "click", OnOptions::default()).unwrap();

        iter.terminate(Some("first".to_string())).await;
        let second = iter.terminate(Some("second".to_string())).await;

        assert_eq!(second, Step::Done(Some("second".to_string())));
        assert_eq!(iter.stop_reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_drop_releases_listener() {
        let target = target();
        let iter = on(&target, "click", OnOptions::default()).unwrap();
        assert_eq!(target.listener_count("click"), 1);

        drop(iter);
        assert_eq!(target.listener_count("click"), 0);
    }

    #[tokio::test]
    async fn test_error_policy_for_external_cancel() {
        let target = target();
        let stop = CancelSource::new();
        let opts = OnOptions::default()
            .with_cancel(stop.token())
            .with_cancel_policy(CancelPolicy::Error);
        let mut iter = on(&target, "click", opts).unwrap();

        stop.cancel_with("shutdown");
        let err = iter.next_step().await.unwrap_err();
        assert!(matches!(
            err,
            EventError::Cancelled { reason: Some(ref r) } if r == "shutdown"
        ));
    }

    #[tokio::test]
    async fn test_error_policy_terminate_is_clean() {
        let target = target();
        let opts = OnOptions::default().with_cancel_policy(CancelPolicy::Error);
        let mut iter = on(&target, "click", opts).unwrap();

        iter.terminate(None).await;
        assert_eq!(iter.next_step().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_stream_ends_on_cancel() {
        let target = target();
        let stop = CancelSource::new();
        let iter = on(&target, "click", OnOptions::default().with_cancel(stop.token())).unwrap();

        target.dispatch("click", 1);
        target.dispatch("click", 2);
        target.dispatch("click", 3);
        stop.cancel(None);
        target.dispatch("click", 4);

        // Cancellation clears what was not yet consumed
        let events: Vec<u32> = iter.collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_stream_take() {
        let target = target();
        let iter = on(&target, "click", OnOptions::default()).unwrap();

        for i in 0..5 {
            target.dispatch("click", i);
        }
        let events: Vec<u32> = iter.take(3).collect().await;
        assert_eq!(events, vec![0, 1, 2]);
        assert_eq!(target.listener_count("click"), 0);
    }

    #[tokio::test]
    async fn test_once_listener() {
        let target = target();
        let opts = OnOptions {
            listener: ListenerOptions {
                once: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut iter = on(&target, "click", opts).unwrap();

        target.dispatch("click", 1);
        target.dispatch("click", 2);

        assert_eq!(iter.next_step().await.unwrap(), Step::Event(1));
        assert_eq!(iter.buffered(), 0);
        assert!(!iter.is_terminated());
    }
}
