//! The bot session.
//!
//! A [`Bot`] owns one mirai-api-http session: the session key obtained by
//! [`authorize`](Bot::authorize), the transport used for requests, and the
//! [`WaiterQueue`] shared by every `next_event*` call and the event stream.
//!
//! ```rust,ignore
//! let bot = Bot::new(MiraiClient::new(endpoint)?.shared());
//! bot.authorize("auth-key", 12345).await?;
//!
//! let stream = bot.start_stream(|event: Event| async move {
//!     tracing::info!(event_type = %event.event_type(), "Unclaimed event");
//!     Ok(Flow::Continue)
//! })?;
//!
//! let reply: FriendMessageEvent = bot.next_event_matching(from_user(10)).await?;
//! ```
//!
//! `Bot` is a cheap handle; clones share the session. When the last clone is
//! dropped, running streams are asked to stop and a still-authorized session
//! is released in the background.

use std::sync::Arc;
use std::time::Duration;

use mirai_core::pattern::{Any, Pattern};
use mirai_core::{
    ApiError, ApiResult, ConcreteEvent, Event, EventCallback, ExceptionSink, HttpRequest, Instant,
    RetryConfig, SharedScheduler, SharedTransport, StopHandle, StreamError, StreamHandle,
    StreamReader, StreamState, TokioScheduler, UserId, WaitResult, WaiterQueue, log_exception,
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Path of the event stream that carries every event type.
const STREAM_PATH: &str = "/all";

/// An authorized session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: String,
    pub bot_id: UserId,
}

struct BotInner {
    transport: SharedTransport,
    scheduler: SharedScheduler,
    queue: WaiterQueue,
    session: RwLock<Option<SessionInfo>>,
    sink: RwLock<ExceptionSink>,
    stop: StopHandle,
}

impl Drop for BotInner {
    fn drop(&mut self) {
        self.stop.request_stop();

        if let Some(session) = self.session.get_mut().take() {
            debug!(bot_id = %session.bot_id, "Releasing session of dropped bot");
            let transport = Arc::clone(&self.transport);
            let request = release_request(&session);
            self.scheduler.spawn(Box::pin(async move {
                if let Err(e) = transport.request(request).await {
                    warn!(bot_id = %session.bot_id, error = %e, "Failed to release session");
                }
            }));
        }
    }
}

/// A mirai-api-http session plus its event multiplexer.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    /// Creates an unauthorized bot running on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`with_scheduler`](Self::with_scheduler) there.
    pub fn new(transport: SharedTransport) -> Self {
        Self::with_scheduler(transport, TokioScheduler::current().shared())
    }

    pub fn with_scheduler(transport: SharedTransport, scheduler: SharedScheduler) -> Self {
        Self {
            inner: Arc::new(BotInner {
                transport,
                queue: WaiterQueue::new(Arc::clone(&scheduler)),
                scheduler,
                session: RwLock::new(None),
                sink: RwLock::new(log_exception()),
                stop: StopHandle::new(),
            }),
        }
    }

    pub fn queue(&self) -> &WaiterQueue {
        &self.inner.queue
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.inner.scheduler
    }

    /// Replaces the sink that receives decode and callback failures of
    /// streams started after this call.
    pub fn set_exception_sink(&self, sink: ExceptionSink) {
        *self.inner.sink.write() = sink;
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.session.read().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.session.read().is_some()
    }

    pub fn bot_id(&self) -> Option<UserId> {
        self.inner.session.read().as_ref().map(|s| s.bot_id)
    }

    pub(crate) fn session_key(&self) -> ApiResult<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| s.key.clone())
            .ok_or(ApiError::NotAuthorized)
    }

    /// Returns a copy of `fields` with the session key added.
    pub(crate) fn with_session(&self, mut fields: Value) -> ApiResult<Value> {
        let key = self.session_key()?;
        match fields.as_object_mut() {
            Some(map) => {
                map.insert("sessionKey".to_owned(), Value::String(key));
                Ok(fields)
            }
            None => Err(ApiError::response("request body must be a JSON object")),
        }
    }

    /// Performs `request` and checks the `code` field of the response.
    ///
    /// List endpoints answer with a bare array, which is passed through.
    pub async fn call(&self, request: HttpRequest) -> ApiResult<Value> {
        let path = request.path.clone();
        let response = self.inner.transport.request(request).await?;
        check_status(&path, response)
    }

    /// Version of the mirai-api-http plugin.
    pub async fn about(&self) -> ApiResult<String> {
        let response = self.call(HttpRequest::get("/about")).await?;
        response
            .pointer("/data/version")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ApiError::response("missing `data.version`"))
    }

    /// Opens a session with `auth_key` and binds it to `bot_id`.
    ///
    /// A bot binds at most one session; authorizing again before
    /// [`release`](Self::release) fails with [`ApiError::AlreadyAuthorized`].
    pub async fn authorize(&self, auth_key: &str, bot_id: impl Into<UserId>) -> ApiResult<()> {
        if self.is_authorized() {
            return Err(ApiError::AlreadyAuthorized);
        }
        let bot_id = bot_id.into();

        let response = self
            .call(HttpRequest::post_json("/auth", json!({ "authKey": auth_key })))
            .await?;
        let key = response
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::response("missing `session`"))?
            .to_owned();

        self.call(HttpRequest::post_json(
            "/verify",
            json!({ "sessionKey": key, "qq": bot_id }),
        ))
        .await?;

        let session = SessionInfo { key, bot_id };
        {
            let mut slot = self.inner.session.write();
            if slot.is_none() {
                *slot = Some(session);
                info!(bot_id = %bot_id, "Session authorized");
                return Ok(());
            }
        }

        // Lost a race with a concurrent authorize; give the new session back.
        let _ = self.call(release_request(&session)).await;
        Err(ApiError::AlreadyAuthorized)
    }

    /// Releases the session. The bot can be authorized again afterwards.
    pub async fn release(&self) -> ApiResult<()> {
        let session = self.session().ok_or(ApiError::NotAuthorized)?;
        self.call(release_request(&session)).await?;

        let mut slot = self.inner.session.write();
        if slot.as_ref() == Some(&session) {
            *slot = None;
        }
        info!(bot_id = %session.bot_id, "Session released");
        Ok(())
    }

    // =========================================================================
    // Event stream
    // =========================================================================

    /// Stop handle shared by every stream this bot starts.
    pub fn stop_handle(&self) -> StopHandle {
        self.inner.stop.clone()
    }

    /// Asks every running stream of this bot to stop and drain.
    pub fn request_stop(&self) {
        self.inner.stop.request_stop();
    }

    /// Starts the stream reader on the session's event stream.
    ///
    /// Events no waiter claims are handed to `callback`.
    pub fn start_stream<C: EventCallback>(&self, callback: C) -> ApiResult<StreamHandle> {
        let key = self.session_key()?;
        let transport = Arc::clone(&self.inner.transport);
        let connect = async move {
            let query = [("sessionKey".to_owned(), key)];
            transport.open_stream(STREAM_PATH, &query).await
        };

        let sink = self.inner.sink.read().clone();
        let handle = StreamReader::new(self.inner.queue.clone())
            .with_exception_sink(sink)
            .with_stop_handle(self.inner.stop.child())
            .start(connect, callback);

        debug!(bot_id = ?self.bot_id(), "Event stream started");
        Ok(handle)
    }

    /// Runs the event stream until it is stopped or fails.
    pub async fn monitor_events<C: EventCallback>(&self, callback: C) -> RuntimeResult<()> {
        self.start_stream(callback)?.join().await?;
        Ok(())
    }

    /// Like [`monitor_events`](Self::monitor_events), but reconnects after
    /// transport failures with exponential backoff.
    ///
    /// The attempt counter resets whenever a connection reached the reading
    /// state. Gives up after `retry.max_retries` consecutive failures.
    pub async fn monitor_events_with_retry<C: EventCallback>(
        &self,
        callback: C,
        retry: &RetryConfig,
    ) -> RuntimeResult<()> {
        let callback = Arc::new(callback);
        let mut attempt = 0u32;

        loop {
            let shared = Arc::clone(&callback);
            let mut handle = self.start_stream(move |event: Event| shared.call(event))?;

            if handle.wait_for_state(StreamState::Reading).await {
                attempt = 0;
            }

            let error = match handle.join().await {
                Ok(()) => return Ok(()),
                Err(StreamError::Transport(e)) => e,
                Err(e) => return Err(e.into()),
            };

            if self.inner.stop.is_stop_requested() {
                return Ok(());
            }
            if attempt >= retry.max_retries {
                warn!(attempts = attempt, error = %error, "Giving up on event stream");
                return Err(RuntimeError::Stream(StreamError::Transport(error)));
            }

            let delay = retry.delay_for(attempt);
            attempt += 1;
            warn!(
                attempt,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Event stream failed, reconnecting"
            );

            tokio::select! {
                () = self.inner.scheduler.sleep(delay) => {}
                () = self.inner.stop.stopped() => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Pattern waits
    // =========================================================================

    /// Waits for the next `E` that no earlier waiter claims.
    pub async fn next_event<E: ConcreteEvent>(&self) -> WaitResult<E> {
        self.inner.queue.await_match::<E, _>(Any).await
    }

    /// Waits for the next `E` accepted by `pattern`.
    pub async fn next_event_matching<E, P>(&self, pattern: P) -> WaitResult<E>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        self.inner.queue.await_match(pattern).await
    }

    /// Waits at most `timeout` for an `E` accepted by `pattern`.
    pub async fn next_event_within<E, P>(&self, timeout: Duration, pattern: P) -> WaitResult<Option<E>>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        self.inner.queue.await_match_within(pattern, timeout).await
    }

    /// Waits until `deadline` for an `E` accepted by `pattern`.
    pub async fn next_event_until<E, P>(&self, deadline: Instant, pattern: P) -> WaitResult<Option<E>>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        self.inner.queue.await_match_until(pattern, deadline).await
    }

    pub async fn sleep(&self, duration: Duration) {
        self.inner.scheduler.sleep(duration).await;
    }

    pub async fn sleep_until(&self, deadline: Instant) {
        self.inner.scheduler.sleep_until(deadline).await;
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("bot_id", &self.bot_id())
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

fn release_request(session: &SessionInfo) -> HttpRequest {
    HttpRequest::post_json(
        "/release",
        json!({ "sessionKey": session.key, "qq": session.bot_id }),
    )
}

fn check_status(path: &str, response: Value) -> ApiResult<Value> {
    match response.get("code").and_then(Value::as_i64) {
        None | Some(0) => Ok(response),
        Some(code) => {
            let err = ApiError::from_status_code(code);
            warn!(path, code, error = %err, "Request rejected");
            Err(err)
        }
    }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use mirai_core::{
        BoxedFrameStream, FrameStream, RequestBody, Transport, TransportError, TransportResult,
    };
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    /// Records requests and answers them from per-path queues, `{"code":0}`
    /// when a queue is empty.
    #[derive(Default)]
    pub struct MockTransport {
        requests: Mutex<Vec<HttpRequest>>,
        responses: Mutex<HashMap<String, VecDeque<Value>>>,
        streams: Mutex<VecDeque<TransportResult<BoxedFrameStream>>>,
        stream_queries: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn respond(&self, path: &str, response: Value) {
            self.responses
                .lock()
                .entry(path.to_owned())
                .or_default()
                .push_back(response);
        }

        pub fn push_stream(&self) -> Feed {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams.lock().push_back(Ok(Box::new(MockStream { frames: rx })));
            Feed { frames: tx }
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }

        pub fn paths(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.path.clone()).collect()
        }

        /// JSON body of the last request to `path`.
        pub fn last_body(&self, path: &str) -> Value {
            self.requests
                .lock()
                .iter()
                .rev()
                .find(|r| r.path == path)
                .and_then(|r| match &r.body {
                    RequestBody::Json(body) => Some(body.clone()),
                    _ => None,
                })
                .unwrap_or(Value::Null)
        }

        pub fn stream_queries(&self) -> Vec<Vec<(String, String)>> {
            self.stream_queries.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn request(&self, request: HttpRequest) -> TransportResult<Value> {
            let response = self
                .responses
                .lock()
                .get_mut(&request.path)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| json!({ "code": 0, "msg": "success" }));
            self.requests.lock().push(request);
            Ok(response)
        }

        async fn open_stream(
            &self,
            path: &str,
            query: &[(String, String)],
        ) -> TransportResult<BoxedFrameStream> {
            self.stream_queries.lock().push(query.to_vec());
            self.streams.lock().pop_front().unwrap_or_else(|| {
                Err(TransportError::ConnectionFailed {
                    url: path.to_owned(),
                    reason: "no stream queued".to_owned(),
                })
            })
        }
    }

    struct MockStream {
        frames: mpsc::UnboundedReceiver<TransportResult<String>>,
    }

    #[async_trait]
    impl FrameStream for MockStream {
        async fn next_frame(&mut self) -> TransportResult<Option<String>> {
            match self.frames.recv().await {
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }

        async fn close(&mut self) -> TransportResult<()> {
            Ok(())
        }
    }

    /// Feeds frames into a queued stream. Dropping it closes the stream.
    pub struct Feed {
        frames: mpsc::UnboundedSender<TransportResult<String>>,
    }

    impl Feed {
        pub fn send(&self, frame: impl Into<String>) {
            let _ = self.frames.send(Ok(frame.into()));
        }

        pub fn fail(&self, reason: &str) {
            let _ = self.frames.send(Err(TransportError::ConnectionClosed {
                reason: reason.to_owned(),
            }));
        }
    }

    pub fn friend_message(sender: i64, message_id: i64, text: &str) -> String {
        json!({
            "type": "FriendMessage",
            "messageChain": [
                { "type": "Source", "id": message_id, "time": 1_600_000_000 },
                { "type": "Plain", "text": text }
            ],
            "sender": { "id": sender, "nickname": "friend", "remark": "" }
        })
        .to_string()
    }

    /// A bot whose session is already authorized as `("session-key", 10)`.
    pub async fn authorized_bot() -> (Bot, Arc<MockTransport>) {
        let transport = MockTransport::new();
        transport.respond("/auth", json!({ "code": 0, "session": "session-key" }));
        let bot = Bot::new(transport.clone());
        bot.authorize("auth-key", 10).await.unwrap();
        (bot, transport)
    }
}
