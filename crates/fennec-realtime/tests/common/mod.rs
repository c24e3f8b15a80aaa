//! Helpers for session tests: an in-process WebSocket server and an event recorder.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fennec_realtime::{
    Error, Event, EventKind, EventRegistry, RealtimeSession, Result, SessionConfig,
    SessionConfigBuilder, TokenFetcher,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

pub type ServerWs = WebSocketStream<TcpStream>;

pub const TEST_TOKEN: &str = "st_test_token";

/// Accepts a single connection and runs `script` against it.
///
/// Returns the `ws://` URL to connect to and the script's join handle. The script
/// receives the request URI (path and query) as the client sent it.
pub async fn serve_once<F, Fut, T>(script: F) -> (String, JoinHandle<T>)
where
    F: FnOnce(ServerWs, String) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
            uri = req.uri().to_string();
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();
        script(ws, uri).await
    });
    (format!("ws://{addr}/api/v1/transcribe/stream"), task)
}

/// Next text frame from the client, skipping control frames. `None` on close.
pub async fn next_text(ws: &mut ServerWs) -> Option<String> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Reads the client's `start` frame and answers `ready`.
pub async fn accept_start(ws: &mut ServerWs) -> Value {
    let start = next_text(ws).await.expect("client sent no start frame");
    let start: Value = serde_json::from_str(&start).unwrap();
    assert_eq!(start["type"], "start");
    send_json(ws, serde_json::json!({"type": "ready", "session_id": "sess_1"})).await;
    start
}

pub async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Test configuration: pings off and a short handshake deadline.
pub fn config(ws_url: &str) -> SessionConfigBuilder {
    SessionConfig::builder("sk_test_key")
        .ws_url(ws_url)
        .http_base("http://127.0.0.1:9")
        .ping_interval(None)
        .handshake_timeout(Duration::from_secs(2))
}

pub fn session(config: SessionConfigBuilder) -> (RealtimeSession, Arc<StaticToken>) {
    let fetcher = Arc::new(StaticToken::default());
    let session = RealtimeSession::with_token_fetcher(config.build().unwrap(), fetcher.clone());
    (session, fetcher)
}

/// Hands out [`TEST_TOKEN`] and counts calls.
#[derive(Default)]
pub struct StaticToken {
    calls: AtomicUsize,
    last_key: Mutex<Option<String>>,
}

impl StaticToken {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_key(&self) -> Option<String> {
        self.last_key.lock().unwrap().clone()
    }
}

impl TokenFetcher for StaticToken {
    fn fetch_token(&self, api_key: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_key.lock().unwrap() = Some(api_key.to_string());
        Ok(TEST_TOKEN.to_string())
    }
}

pub struct FailingToken;

impl TokenFetcher for FailingToken {
    fn fetch_token(&self, _api_key: &str) -> Result<String> {
        Err(Error::TokenFetch {
            status: Some(401),
            message: "Token fetch failed (HTTP 401): invalid key".into(),
        })
    }
}

/// Records every emitted event as a short string such as `partial:hi`.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn attach(events: &EventRegistry) -> Self {
        let log = Self::default();
        for kind in EventKind::ALL {
            let sink = log.clone();
            events.on(kind, move |event| {
                sink.push(describe(event));
                Ok(())
            });
        }
        log
    }

    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Polls until `done` holds, failing the test after three seconds.
    pub async fn wait_for(&self, done: impl Fn(&[String]) -> bool) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let entries = self.entries();
            if done(&entries) {
                return entries;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for events, got {entries:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn describe(event: &Event) -> String {
    match event {
        Event::Open => "open".to_string(),
        Event::Partial(text) => format!("partial:{text}"),
        Event::Final(text) => format!("final:{text}"),
        Event::Thought(text) => format!("thought:{text}"),
        Event::Close => "close".to_string(),
        Event::Error(err) => format!("error:{err}"),
    }
}
