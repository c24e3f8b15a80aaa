use std::time::Duration;

use fennec_realtime_types::InboundMessage;
use tokio_tungstenite::tungstenite;

use crate::events::EventKind;

/// Boxed error returned by user callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by a realtime session.
///
/// Errors raised by `open()` (configuration, token fetch, connection, handshake) are
/// returned to the caller. Errors that happen after the session is open are delivered
/// through the `error` event instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Raised synchronously
    // -------------------------------------------------------------------------
    /// Missing or invalid configuration, detected at `build()` time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The streaming-token endpoint was unreachable or answered with something unusable.
    #[error("token fetch failed: {message}")]
    TokenFetch {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        message: String,
    },

    /// The WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    Connection(#[source] tungstenite::Error),

    /// The start/ready exchange failed. The transport is closed before this is returned.
    #[error("WebSocket handshake failed: {message}")]
    Handshake {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// A send was attempted while the session is not open.
    #[error("WebSocket not connected")]
    NotConnected,

    /// `open()` was called on a session that is already open.
    #[error("session is already open")]
    AlreadyOpen,

    // -------------------------------------------------------------------------
    // Delivered through the `error` event
    // -------------------------------------------------------------------------
    /// The server sent a `{"type":"error"}` frame. The receive loop keeps running.
    #[error("server reported an error: {0}")]
    ServerReported(InboundMessage),

    /// Reading from or writing to the WebSocket failed.
    #[error("WebSocket transport error: {0}")]
    Transport(#[source] tungstenite::Error),

    /// The server closed the connection.
    #[error("connection closed (code: {code:?}, reason: {reason:?})")]
    ConnectionClosed {
        code: Option<u16>,
        reason: Option<String>,
    },

    /// No pong arrived within the configured ping timeout.
    #[error("keepalive ping timed out after {0:?}")]
    KeepaliveTimeout(Duration),

    /// A registered callback failed or panicked.
    #[error("{event} callback failed: {source}")]
    Callback {
        event: EventKind,
        #[source]
        source: CallbackError,
    },

    /// Failed to encode an outgoing frame.
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for realtime session operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn handshake(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Handshake {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn token_fetch(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::TokenFetch {
            status,
            message: message.into(),
        }
    }

    /// Whether this error aborts an `open()` attempt.
    pub fn is_fatal_to_open(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::TokenFetch { .. }
                | Error::Connection(_)
                | Error::Handshake { .. }
                | Error::AlreadyOpen
        )
    }

    /// Whether reopening the session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TokenFetch { .. }
                | Error::Connection(_)
                | Error::Handshake { .. }
                | Error::Transport(_)
                | Error::ConnectionClosed { .. }
                | Error::KeepaliveTimeout(_)
        )
    }
}
