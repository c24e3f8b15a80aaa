//! Wire types for the Fennec realtime transcription WebSocket protocol.
//!
//! The protocol is a small JSON exchange:
//!
//! 1. Client sends a [`StartMessage`] (`{"type":"start", ...}`) right after connecting.
//! 2. Server answers with `{"type":"ready", ...}`.
//! 3. Client streams raw PCM as binary frames, then sends [`ControlMessage::Eos`].
//! 4. Server pushes transcript objects carrying `text` / `is_final`, `complete_thought`
//!    frames when thought detection is on, and `{"type":"error", ...}` frames.
//!
//! Server frames are kept as loosely-typed [`InboundMessage`]s because the server adds
//! fields freely; accessors cover the handful the client reacts to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `type` of the server's handshake acknowledgement.
pub const READY: &str = "ready";
/// `type` of a server-reported error frame.
pub const ERROR: &str = "error";
/// `type` of a thought-boundary frame (only sent when thought detection is on).
pub const COMPLETE_THOUGHT: &str = "complete_thought";

/// The first frame a client sends on a fresh connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename = "start")]
pub struct StartMessage {
    pub sample_rate: u32,
    pub channels: u16,
    /// Only serialized when set; the server treats absence as `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_utterance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vad: Option<Map<String, Value>>,
}

impl StartMessage {
    /// Builds a start frame, omitting `single_utterance` when false and `vad` when empty.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        single_utterance: bool,
        vad: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            single_utterance: single_utterance.then_some(true),
            vad: vad.filter(|v| !v.is_empty()),
        }
    }
}

/// Client control frames other than `start`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// End of audio; the server flushes its final transcript.
    Eos,
}

impl ControlMessage {
    /// The exact text frame sent on the wire.
    pub fn as_frame(&self) -> &'static str {
        match self {
            ControlMessage::Eos => r#"{"type":"eos"}"#,
        }
    }
}

/// A decoded JSON object received from the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct InboundMessage(Map<String, Value>);

impl InboundMessage {
    /// Decodes a frame. Returns `None` for invalid JSON or for JSON that is not an object.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Value>(raw).ok()? {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The `type` field, when it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// The `text` field, only when it is a non-empty string.
    pub fn text(&self) -> Option<&str> {
        self.0
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// `true` only when `is_final` is the JSON boolean `true`.
    pub fn is_final(&self) -> bool {
        self.0
            .get("is_final")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_ready(&self) -> bool {
        self.kind() == Some(READY)
    }

    pub fn is_error(&self) -> bool {
        self.kind() == Some(ERROR)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for InboundMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl std::fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
