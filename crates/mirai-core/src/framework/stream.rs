//! The stream reader loop and fallback dispatch.
//!
//! A [`StreamReader`] owns the read side of the event stream. For each frame
//! it decodes an [`Event`], offers it to the [`WaiterQueue`], and spawns the
//! fallback callback for events no waiter claimed.
//!
//! ```text
//! Connecting ──▶ Reading ◀──▶ Dispatching
//!                   │
//!        stop / peer close / transport error
//!                   ▼
//!               Draining ──▶ Closed
//! ```
//!
//! Decoding and claiming happen one frame at a time on the reader task.
//! Fallback callbacks run concurrently and are tracked, so the reader does
//! not report [`Closed`](StreamState::Closed) before every callback finished.
//! The waiter queue is closed when reading ends, so a callback waiting for
//! another event fails instead of holding up the drain.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::error::{BoxError, DispatchError, StreamError, StreamResult, WaitError, panic_message};
use super::scheduler::SharedScheduler;
use super::waiter::{Claim, WaiterQueue};
use crate::foundation::error::{TransportError, TransportResult};
use crate::foundation::event::Event;
use crate::integration::transport::BoxedFrameStream;

// ============================================================================
// Callback types
// ============================================================================

/// What the reader does after a fallback callback returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    /// Stop reading and drain, as if [`StopHandle::request_stop`] was called.
    Stop,
}

pub type CallbackResult = Result<Flow, BoxError>;

/// Fallback callback run for every event no waiter claimed.
pub trait EventCallback: Send + Sync + 'static {
    fn call(&self, event: Event) -> BoxFuture<'static, CallbackResult>;
}

impl<F, Fut> EventCallback for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<'static, CallbackResult> {
        Box::pin(self(event))
    }
}

/// Receives decode failures and callback failures.
pub type ExceptionSink = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// The default sink: logs the failure and carries on.
pub fn log_exception() -> ExceptionSink {
    Arc::new(|err: &DispatchError| error!(error = %err, "Event dispatch failed"))
}

// ============================================================================
// Stop handle / state
// ============================================================================

/// Requests a graceful stop of one or more readers.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle that is stopped together with this one, but can also be
    /// stopped on its own.
    pub fn child(&self) -> StopHandle {
        Self {
            token: self.token.child_token(),
        }
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Reading,
    Dispatching,
    Draining,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Reading => "reading",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StreamReader
// ============================================================================

/// Builder and owner of one run of the reader loop.
pub struct StreamReader {
    queue: WaiterQueue,
    scheduler: SharedScheduler,
    sink: ExceptionSink,
    stop: StopHandle,
}

impl StreamReader {
    pub fn new(queue: WaiterQueue) -> Self {
        let scheduler = Arc::clone(queue.scheduler());
        Self {
            queue,
            scheduler,
            sink: log_exception(),
            stop: StopHandle::new(),
        }
    }

    pub fn with_exception_sink(mut self, sink: ExceptionSink) -> Self {
        self.sink = sink;
        self
    }

    /// Uses `stop` instead of a fresh handle.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Spawns the reader loop on the scheduler.
    ///
    /// `connect` opens the stream; `callback` handles unclaimed events.
    pub fn start<F, C>(self, connect: F, callback: C) -> StreamHandle
    where
        F: Future<Output = TransportResult<BoxedFrameStream>> + Send + 'static,
        C: EventCallback,
    {
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let (result_tx, result_rx) = oneshot::channel();
        let stop = self.stop.clone();
        let scheduler = Arc::clone(&self.scheduler);

        scheduler.spawn(Box::pin(async move {
            let result = self.run(connect, Arc::new(callback), state_tx).await;
            let _ = result_tx.send(result);
        }));

        StreamHandle {
            stop,
            state: state_rx,
            result: result_rx,
        }
    }

    async fn run<F, C>(self, connect: F, callback: Arc<C>, state: watch::Sender<StreamState>) -> StreamResult<()>
    where
        F: Future<Output = TransportResult<BoxedFrameStream>> + Send,
        C: EventCallback,
    {
        let stop = self.stop.token.clone();
        self.queue.reopen().await;

        let connected = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            result = connect => Some(result),
        };
        let mut stream = match connected {
            None => {
                info!("Stop requested before the event stream connected");
                self.queue.close(WaitError::StreamClosed).await;
                state.send_replace(StreamState::Closed);
                return Ok(());
            }
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                error!(error = %err, "Failed to open event stream");
                self.queue.close(WaitError::StreamFailed(err.clone())).await;
                state.send_replace(StreamState::Closed);
                return Err(err.into());
            }
        };

        info!("Event stream connected");
        state.send_replace(StreamState::Reading);
        let tracker = TaskTracker::new();

        let outcome: Result<(), TransportError> = loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Stop requested, leaving read loop");
                    break Ok(());
                }
                frame = stream.next_frame() => frame,
            };

            match frame {
                Ok(Some(raw)) => {
                    state.send_replace(StreamState::Dispatching);
                    self.dispatch(&raw, &callback, &tracker).await;
                    state.send_replace(StreamState::Reading);
                }
                Ok(None) => {
                    info!("Event stream closed by peer");
                    break Ok(());
                }
                Err(err) => {
                    error!(error = %err, "Event stream failed");
                    break Err(err);
                }
            }
        };

        state.send_replace(StreamState::Draining);

        // No event can reach a waiter any more, including those of the
        // callbacks being drained.
        let reason = match &outcome {
            Ok(()) => WaitError::StreamClosed,
            Err(err) => WaitError::StreamFailed(err.clone()),
        };
        let failed = self.queue.close(reason).await;

        tracker.close();
        debug!(in_flight = tracker.len(), failed_waiters = failed, "Draining fallback callbacks");
        tracker.wait().await;

        if let Err(err) = stream.close().await {
            warn!(error = %err, "Failed to close event stream");
        }

        state.send_replace(StreamState::Closed);
        info!("Event stream closed");
        outcome.map_err(StreamError::from)
    }

    async fn dispatch<C: EventCallback>(&self, raw: &str, callback: &Arc<C>, tracker: &TaskTracker) {
        let event = match Event::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, len = raw.len(), "Skipping undecodable frame");
                (self.sink)(&DispatchError::Decode(err));
                return;
            }
        };
        let event_type = event.event_type();
        trace!(%event_type, "Decoded frame");

        let event = match self.queue.try_claim(event).await {
            Claim::Claimed => return,
            Claim::Unclaimed(event) => event,
        };

        let callback = Arc::clone(callback);
        let sink = Arc::clone(&self.sink);
        let stop = self.stop.clone();
        let task = tracker.track_future(async move {
            match AssertUnwindSafe(callback.call(event)).catch_unwind().await {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Stop)) => {
                    info!(%event_type, "Callback requested stop");
                    stop.request_stop();
                }
                Ok(Err(source)) => sink(&DispatchError::Callback { event_type, source }),
                Err(payload) => sink(&DispatchError::CallbackPanicked {
                    event_type,
                    message: panic_message(payload.as_ref()),
                }),
            }
        });
        trace!(%event_type, in_flight = tracker.len(), "Spawning fallback callback");
        self.scheduler.spawn(Box::pin(task));
    }
}

// ============================================================================
// StreamHandle
// ============================================================================

/// Handle to a running reader. Resolves once the reader is closed.
pub struct StreamHandle {
    stop: StopHandle,
    state: watch::Receiver<StreamState>,
    result: oneshot::Receiver<StreamResult<()>>,
}

impl StreamHandle {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Begins a graceful stop. The handle still resolves only after draining.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Waits until the reader reaches `state`. Returns `false` if it closed first.
    pub async fn wait_for_state(&mut self, state: StreamState) -> bool {
        match self
            .state
            .wait_for(|current| *current == state || *current == StreamState::Closed)
            .await
        {
            Ok(current) => *current == state,
            Err(_) => false,
        }
    }

    pub async fn join(self) -> StreamResult<()> {
        self.await
    }
}

impl Future for StreamHandle {
    type Output = StreamResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Err(StreamError::Aborted("reader task dropped".into())))
        })
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("state", &self.state())
            .field("stop_requested", &self.stop.is_stop_requested())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::channel_stream;
    use super::*;
    use crate::foundation::event::GroupMessageEvent;
    use crate::foundation::event::fixtures::group_message;
    use crate::framework::pattern::text_eq;
    use crate::framework::scheduler::TokioScheduler;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn queue() -> WaiterQueue {
        WaiterQueue::new(TokioScheduler::current().shared())
    }

    fn frame(id: i64, text: &str) -> String {
        group_message(1, 2, id, text)
    }

    fn message_id(event: &Event) -> i64 {
        event
            .get_if::<GroupMessageEvent>()
            .map(|message| message.message.id().0)
            .unwrap_or(-1)
    }

    fn connected(stream: BoxedFrameStream) -> futures::future::Ready<TransportResult<BoxedFrameStream>> {
        futures::future::ready(Ok(stream))
    }

    fn recording_callback(seen: Arc<Mutex<Vec<i64>>>) -> impl EventCallback {
        move |event: Event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(message_id(&event));
                CallbackResult::Ok(Flow::Continue)
            }
        }
    }

    fn recording_sink(errors: Arc<Mutex<Vec<String>>>) -> ExceptionSink {
        Arc::new(move |err: &DispatchError| errors.lock().push(err.to_string()))
    }

    #[tokio::test]
    async fn unclaimed_events_reach_the_callback_once() {
        let (feed, stream) = channel_stream();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = StreamReader::new(queue())
            .start(connected(stream), recording_callback(Arc::clone(&seen)));

        feed.send(frame(1, "a"));
        feed.send(frame(2, "b"));
        drop(feed.frames);

        handle.await.unwrap();

        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        assert!(feed.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn claimed_events_bypass_the_callback() {
        let queue = queue();
        let (feed, stream) = channel_stream();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let waiter = queue.enqueue::<GroupMessageEvent, _>(text_eq("ping")).await;
        let handle = StreamReader::new(queue.clone())
            .start(connected(stream), recording_callback(Arc::clone(&seen)));

        feed.send(frame(1, "ping"));
        feed.send(frame(2, "other"));

        let matched = waiter.await.unwrap();
        assert_eq!(matched.message.id().0, 1);

        handle.request_stop();
        handle.await.unwrap();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test]
    async fn decode_errors_are_reported_and_skipped() {
        let (feed, stream) = channel_stream();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let handle = StreamReader::new(queue())
            .with_exception_sink(recording_sink(Arc::clone(&errors)))
            .start(connected(stream), recording_callback(Arc::clone(&seen)));

        feed.send("not json");
        feed.send(r#"{"type":"SomethingNew"}"#);
        feed.send(frame(3, "fine"));
        drop(feed.frames);

        handle.await.unwrap();
        assert_eq!(*seen.lock(), vec![3]);
        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("SomethingNew"));
    }

    #[tokio::test]
    async fn callback_failures_go_to_the_sink() {
        let (feed, stream) = channel_stream();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&completed);
        let callback = move |event: Event| {
            let done = Arc::clone(&done);
            async move {
                match message_id(&event) {
                    1 => Err::<Flow, BoxError>("boom".into()),
                    2 => panic!("callback exploded"),
                    _ => {
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(Flow::Continue)
                    }
                }
            }
        };

        let handle = StreamReader::new(queue())
            .with_exception_sink(recording_sink(Arc::clone(&errors)))
            .start(connected(stream), callback);

        feed.send(frame(1, "x"));
        feed.send(frame(2, "x"));
        feed.send(frame(3, "x"));
        drop(feed.frames);

        handle.await.unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let mut errors = errors.lock().clone();
        errors.sort();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("boom"));
        assert!(errors[1].contains("callback exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_callbacks() {
        let (feed, stream) = channel_stream();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let callback = move |event: Event| {
            let done = Arc::clone(&done);
            async move {
                if message_id(&event) == 1 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    CallbackResult::Ok(Flow::Continue)
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    CallbackResult::Ok(Flow::Stop)
                }
            }
        };

        let handle = StreamReader::new(queue()).start(connected(stream), callback);
        feed.send(frame(1, "slow"));
        feed.send(frame(2, "stop"));

        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert!(feed.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn external_stop_drains_before_resolving() {
        let (feed, stream) = channel_stream();
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let (begin, done) = (Arc::clone(&started), Arc::clone(&finished));
        let callback = move |_event: Event| {
            let (begin, done) = (Arc::clone(&begin), Arc::clone(&done));
            async move {
                begin.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.fetch_add(1, Ordering::SeqCst);
                CallbackResult::Ok(Flow::Continue)
            }
        };

        let mut handle = StreamReader::new(queue()).start(connected(stream), callback);
        assert!(handle.wait_for_state(StreamState::Reading).await);

        feed.send(frame(1, "x"));
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        handle.request_stop();
        assert!(handle.stop_handle().is_stop_requested());
        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_fails_the_handle_and_pending_waiters() {
        let queue = queue();
        let (feed, stream) = channel_stream();
        let waiter = queue.enqueue::<GroupMessageEvent, _>(text_eq("never")).await;

        let mut handle = StreamReader::new(queue.clone())
            .start(connected(stream), recording_callback(Arc::default()));
        feed.fail(TransportError::ConnectionClosed {
            reason: "reset by peer".into(),
        });

        assert!(handle.wait_for_state(StreamState::Closed).await);
        assert!(matches!(handle.await, Err(StreamError::Transport(_))));
        assert!(matches!(waiter.await, Err(WaitError::StreamFailed(_))));
        assert!(feed.is_closed());
    }

    /// A callback that waits on the queue for each event it receives, twice.
    fn waiting_callback(
        queue: WaiterQueue,
        outcomes: Arc<Mutex<Vec<Option<WaitError>>>>,
    ) -> impl EventCallback {
        move |_event: Event| {
            let (queue, outcomes) = (queue.clone(), Arc::clone(&outcomes));
            async move {
                for _ in 0..2 {
                    let result = queue
                        .await_match::<GroupMessageEvent, _>(text_eq("reply"))
                        .await;
                    outcomes.lock().push(result.err());
                }
                CallbackResult::Ok(Flow::Continue)
            }
        }
    }

    #[tokio::test]
    async fn transport_error_releases_callbacks_waiting_on_the_queue() {
        let queue = queue();
        let (feed, stream) = channel_stream();
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let handle = StreamReader::new(queue.clone())
            .start(connected(stream), waiting_callback(queue.clone(), Arc::clone(&outcomes)));

        feed.send(frame(1, "question"));
        while queue.is_empty().await {
            tokio::task::yield_now().await;
        }
        feed.fail(TransportError::ConnectionClosed {
            reason: "reset by peer".into(),
        });

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("handle resolves after a transport error");
        assert!(matches!(result, Err(StreamError::Transport(_))));

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 2);
        assert!(
            outcomes
                .iter()
                .all(|outcome| matches!(outcome, Some(WaitError::StreamFailed(_))))
        );
    }

    #[tokio::test]
    async fn stop_releases_callbacks_waiting_on_the_queue() {
        let queue = queue();
        let (feed, stream) = channel_stream();
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let handle = StreamReader::new(queue.clone())
            .start(connected(stream), waiting_callback(queue.clone(), Arc::clone(&outcomes)));

        feed.send(frame(1, "question"));
        while queue.is_empty().await {
            tokio::task::yield_now().await;
        }
        handle.request_stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("handle resolves after a stop")
            .unwrap();

        // The second wait was registered while draining and failed at once.
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 2);
        assert!(
            outcomes
                .iter()
                .all(|outcome| matches!(outcome, Some(WaitError::StreamClosed)))
        );
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn next_reader_reopens_the_queue() {
        let queue = queue();
        let (first_feed, first) = channel_stream();
        drop(first_feed.frames);
        StreamReader::new(queue.clone())
            .start(connected(first), recording_callback(Arc::default()))
            .await
            .unwrap();
        assert!(queue.is_closed().await);

        let (feed, second) = channel_stream();
        let mut handle = StreamReader::new(queue.clone())
            .start(connected(second), recording_callback(Arc::default()));
        assert!(handle.wait_for_state(StreamState::Reading).await);

        let waiter = queue.enqueue::<GroupMessageEvent, _>(text_eq("ping")).await;
        feed.send(frame(7, "ping"));
        assert_eq!(waiter.await.unwrap().message.id().0, 7);

        handle.request_stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_terminal() {
        let handle = StreamReader::new(queue()).start(
            futures::future::ready(Err(TransportError::ConnectionFailed {
                url: "ws://127.0.0.1:1/all".into(),
                reason: "refused".into(),
            })),
            recording_callback(Arc::default()),
        );

        assert!(matches!(
            handle.await,
            Err(StreamError::Transport(TransportError::ConnectionFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn stop_before_connect_closes_cleanly() {
        let stop = StopHandle::new();
        stop.request_stop();

        let handle = StreamReader::new(queue())
            .with_stop_handle(stop)
            .start(std::future::pending(), recording_callback(Arc::default()));

        handle.await.unwrap();
    }
}
