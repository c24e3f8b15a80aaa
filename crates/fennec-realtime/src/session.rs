//! The realtime streaming session.
//!
//! A [`RealtimeSession`] owns one WebSocket connection at a time. `open()` fetches a
//! streaming token, connects, performs the `start`/`ready` handshake and spawns the
//! receive loop; `close()` tears all of it down. Audio and control frames go out
//! through a [`SessionHandle`], which can be cloned into other tasks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fennec_realtime_types::{ControlMessage, READY};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::endpoint;
use crate::events::{CallbackResult, Event, EventKind, EventRegistry};
use crate::keepalive::Keepalive;
use crate::queue::{MessageQueue, MessageStream};
use crate::receiver::{Receiver, closed_error};
use crate::token::{HttpTokenFetcher, TokenFetcher};
use crate::{Error, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;
/// Write half shared between the session, its handles and the keepalive pinger.
/// `None` whenever the session is not open.
pub(crate) type SharedSink = Arc<Mutex<Option<WsSink>>>;
/// Queue of the current connection. Each successful `open()` installs a fresh one so
/// streams taken from an earlier connection stay ended.
type SharedQueue = Arc<std::sync::Mutex<Arc<MessageQueue>>>;

const CLIENT_DONE: &str = "client_done";
const PROTOCOL_ERROR: &str = "protocol_error";

/// Lifecycle of a [`RealtimeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Cloneable sending and consuming side of a session.
///
/// Every clone talks to whatever connection the session currently holds; once the
/// session is closed all sends fail with [`Error::NotConnected`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    writer: SharedSink,
    queue: SharedQueue,
    events: EventRegistry,
}

impl SessionHandle {
    /// Sends one binary frame verbatim. Expected to be 16-bit little-endian PCM.
    pub async fn send_bytes(&self, chunk: impl Into<Vec<u8>>) -> Result<()> {
        let chunk: Vec<u8> = chunk.into();
        self.send(Message::binary(chunk)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text: String = text.into();
        self.send(Message::text(text)).await
    }

    /// Signals end of audio; the server flushes its last transcript.
    pub async fn send_eos(&self) -> Result<()> {
        self.send_text(ControlMessage::Eos.as_frame()).await
    }

    async fn send(&self, message: Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;
        sink.send(message).await.map_err(Error::Transport)
    }

    /// Pull-style view of every decoded server message. Ends when the connection does.
    ///
    /// A stream taken before `open()` follows the connection that `open()` makes. One
    /// taken after `close()` is already ended.
    pub fn messages(&self) -> MessageStream {
        MessageStream::new(self.queue())
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Queue of the current (or next) connection.
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Installs an empty queue unless the current one is still unused.
    fn next_queue(&self, capacity: usize) -> Arc<MessageQueue> {
        let mut current = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_closed() {
            *current = Arc::new(MessageQueue::new(capacity));
        }
        current.clone()
    }
}

/// A realtime transcription session.
///
/// ```ignore
/// let config = SessionConfig::builder(api_key).detect_thoughts(true).build()?;
/// let mut session = RealtimeSession::new(config);
/// session.events().on_final(|text| {
///     println!("{text}");
///     Ok(())
/// });
/// session.open().await?;
/// for chunk in pcm.chunks(3200) {
///     session.send_bytes(chunk).await?;
/// }
/// session.send_eos().await?;
/// session.close().await;
/// ```
pub struct RealtimeSession {
    config: Arc<SessionConfig>,
    token_fetcher: Arc<dyn TokenFetcher>,
    handle: SessionHandle,
    state: SessionState,
    receiver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("state", &self.state)
            .field("ws_url", &endpoint::redacted(self.config.ws_url()))
            .field("events", &self.handle.events)
            .finish_non_exhaustive()
    }
}

impl RealtimeSession {
    /// Creates an idle session that fetches tokens from the configured HTTP endpoint.
    pub fn new(config: SessionConfig) -> Self {
        let fetcher = HttpTokenFetcher::new(config.token_url(), config.token_timeout());
        Self::with_token_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_token_fetcher(config: SessionConfig, token_fetcher: Arc<dyn TokenFetcher>) -> Self {
        let handle = SessionHandle {
            writer: Arc::new(Mutex::new(None)),
            queue: Arc::new(std::sync::Mutex::new(Arc::new(MessageQueue::new(
                config.queue_max(),
            )))),
            events: EventRegistry::new(),
        };
        Self {
            config: Arc::new(config),
            token_fetcher,
            handle,
            state: SessionState::Idle,
            receiver: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    ///
    /// A session whose connection dropped stays `Open` until [`close`](Self::close)
    /// is called; the failure itself arrives through the `error` event.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> &EventRegistry {
        &self.handle.events
    }

    /// Registers `callback` for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> &Self
    where
        F: Fn(&Event) -> CallbackResult + Send + Sync + 'static,
    {
        self.handle.events.on(kind, callback);
        self
    }

    pub fn off(&self, kind: EventKind) -> &Self {
        self.handle.events.off(kind);
        self
    }

    pub fn messages(&self) -> MessageStream {
        self.handle.messages()
    }

    pub async fn send_bytes(&self, chunk: impl Into<Vec<u8>>) -> Result<()> {
        self.handle.send_bytes(chunk).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.handle.send_text(text).await
    }

    pub async fn send_eos(&self) -> Result<()> {
        self.handle.send_eos().await
    }

    /// Connects and completes the handshake, then starts the receive loop.
    ///
    /// # Errors
    ///
    /// [`Error::TokenFetch`], [`Error::Connection`] or [`Error::Handshake`] when the
    /// attempt fails, in which case no connection is left open, and
    /// [`Error::AlreadyOpen`] if called while open.
    pub async fn open(&mut self) -> Result<()> {
        if self.state == SessionState::Open {
            return Err(Error::AlreadyOpen);
        }

        self.state = SessionState::Connecting;
        let ws = match self.establish().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "failed to open realtime session");
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        let queue = self.handle.next_queue(self.config.queue_max());
        let (sink, source) = ws.split();
        *self.handle.writer.lock().await = Some(sink);
        self.state = SessionState::Open;
        info!("realtime session open");
        self.handle.events.emit(Event::Open);

        let keepalive = Keepalive::new(
            self.config.ping_interval(),
            self.config.ping_timeout(),
            tokio::time::Instant::now(),
        );
        let receiver = Receiver::new(
            source,
            self.handle.writer.clone(),
            self.handle.events.clone(),
            queue,
            self.config.detect_thoughts(),
            keepalive,
        );
        self.receiver = Some(tokio::spawn(receiver.run()));
        Ok(())
    }

    async fn establish(&mut self) -> Result<WsStream> {
        let url = self.connection_url().await?;
        info!(url = %endpoint::redacted(&url), "connecting to realtime transcription");

        let ws_config = WebSocketConfig::default()
            .max_message_size(None)
            .max_frame_size(None);
        let (mut ws, _response) = connect_async_with_config(url.as_str(), Some(ws_config), false)
            .await
            .map_err(Error::Connection)?;

        self.state = SessionState::Handshaking;
        handshake(&mut ws, &self.config).await?;
        Ok(ws)
    }

    async fn connection_url(&self) -> Result<Url> {
        let base = self.config.ws_url();
        let detect_thoughts = self.config.detect_thoughts();

        if !self.config.force_token() {
            warn!("streaming tokens disabled, sending the API key in the connection URL");
            return Ok(endpoint::api_key_url(
                base,
                self.config.api_key.expose_secret(),
                detect_thoughts,
            ));
        }

        let fetcher = self.token_fetcher.clone();
        let config = self.config.clone();
        let token = tokio::task::spawn_blocking(move || {
            fetcher.fetch_token(config.api_key.expose_secret())
        })
        .await
        .map_err(|e| Error::token_fetch(None, format!("token fetch task failed: {e}")))??;

        Ok(endpoint::token_url(base, &token, detect_thoughts))
    }

    /// Stops the receive loop, closes the connection with `1000 client_done` and
    /// emits `close`.
    ///
    /// Safe to call at any time and any number of times; `close` is emitted on every call.
    pub async fn close(&mut self) {
        if self.state != SessionState::Idle {
            self.state = SessionState::Closing;
        }
        self.stop_receiver().await;

        let sink = self.handle.writer.lock().await.take();
        if let Some(sink) = sink {
            send_client_done(sink).await;
            info!("realtime session closed");
        }

        self.handle.queue().close();
        self.state = SessionState::Closed;
        self.handle.events.emit(Event::Close);
    }

    /// Synchronous counterpart of [`close`](Self::close) for drop paths. The close
    /// frame is sent from a spawned task when a runtime is available.
    fn close_detached(&mut self) {
        if let Some(task) = self.receiver.take() {
            task.abort();
        }
        if !matches!(self.state, SessionState::Open | SessionState::Closing) {
            return;
        }

        let sink = match self.handle.writer.try_lock() {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                debug!("writer busy, dropping connection without a close frame");
                None
            }
        };
        if let Some(sink) = sink {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(send_client_done(sink));
                }
                Err(_) => debug!("no runtime, dropping connection without a close frame"),
            }
            info!("realtime session dropped while open, closing");
        }

        self.handle.queue().close();
        self.state = SessionState::Closed;
        self.handle.events.emit(Event::Close);
    }

    async fn stop_receiver(&mut self) {
        if let Some(task) = self.receiver.take() {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "receive loop panicked");
                }
            }
        }
    }

    /// Opens the session, runs `body` with a handle, and closes the session on every
    /// exit path of `body`.
    ///
    /// A panic in `body` closes the session and then resumes unwinding. Dropping the
    /// returned future before it completes closes the session in the background.
    pub async fn scoped<F, Fut, T, E>(&mut self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.open().await?;
        let mut guard = ScopeGuard {
            session: self,
            armed: true,
        };
        let handle = guard.session.handle();
        let outcome = AssertUnwindSafe(body(handle)).catch_unwind().await;
        guard.session.close().await;
        guard.armed = false;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close_detached();
    }
}

/// Closes the session if a `scoped` future is dropped mid-flight.
struct ScopeGuard<'a> {
    session: &'a mut RealtimeSession,
    armed: bool,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.close_detached();
        }
    }
}

async fn send_client_done(mut sink: WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: CLIENT_DONE.into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "close frame not delivered");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "error while shutting down the connection");
    }
}

/// Sends the `start` frame and checks that the server answers `ready`.
///
/// On failure the connection is closed before returning: `1002 protocol_error` for a
/// reply that is not `ready`, a bare close otherwise.
async fn handshake(ws: &mut WsStream, config: &SessionConfig) -> Result<()> {
    match await_reply(ws, config).await {
        Ok((_, reply)) if reply.get("type").and_then(Value::as_str) == Some(READY) => {
            debug!("handshake complete");
            Ok(())
        }
        Ok((raw, _)) => {
            let frame = CloseFrame {
                code: CloseCode::Protocol,
                reason: PROTOCOL_ERROR.into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                debug!(error = %e, "failed to close after bad handshake reply");
            }
            Err(Error::Handshake {
                message: format!("Unexpected handshake response: {raw}"),
                source: None,
            })
        }
        Err(e) => {
            if let Err(close_err) = ws.close(None).await {
                debug!(error = %close_err, "connection already gone after handshake failure");
            }
            Err(e)
        }
    }
}

/// The server's first reply, verbatim and parsed.
async fn await_reply(ws: &mut WsStream, config: &SessionConfig) -> Result<(String, Value)> {
    let start = serde_json::to_string(&config.start_message())?;
    ws.send(Message::text(start))
        .await
        .map_err(|e| Error::handshake("failed to send start frame", e))?;

    let wait = config.handshake_timeout();
    let raw = match tokio::time::timeout(wait, next_payload(ws)).await {
        Ok(raw) => raw?,
        Err(_) => {
            return Err(Error::Handshake {
                message: format!("no handshake response within {wait:?}"),
                source: None,
            });
        }
    };

    let reply = serde_json::from_slice(&raw)
        .map_err(|e| Error::handshake("invalid handshake response", e))?;
    Ok((String::from_utf8_lossy(&raw).into_owned(), reply))
}

/// Next text or binary payload, skipping control frames.
async fn next_payload(ws: &mut WsStream) -> Result<Vec<u8>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::handshake(
                    "connection closed during handshake",
                    closed_error(frame),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::handshake("transport failed during handshake", e)),
            None => {
                return Err(Error::handshake(
                    "connection closed during handshake",
                    closed_error(None),
                ));
            }
        }
    }
}
