//! Session configuration and builder.
//!
//! ```ignore
//! use fennec_realtime::SessionConfig;
//!
//! let config = SessionConfig::builder("sk_live_...")
//!     .sample_rate(16000)
//!     .detect_thoughts(true)
//!     .queue_max(256)
//!     .build()?;
//! ```

use std::time::Duration;

use fennec_realtime_types::StartMessage;
use secrecy::SecretString;
use serde_json::{Map, Value};
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_WS_URL: &str = "wss://api.fennec-asr.com/api/v1/transcribe/stream";
pub const DEFAULT_HTTP_BASE: &str = "https://api.fennec-asr.com/api/v1";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "/transcribe/streaming-token";
/// Environment variable that overrides the HTTP base when none is set explicitly.
pub const BASE_URL_ENV: &str = "FENNEC_BASE_URL";

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_MAX: usize = 128;
/// How long `open()` waits for the server's `ready` frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Immutable configuration for a [`RealtimeSession`](crate::RealtimeSession).
///
/// Use [`SessionConfig::builder()`] to create one.
#[derive(Debug)]
pub struct SessionConfig {
    pub(crate) api_key: SecretString,
    pub(crate) ws_url: Url,
    pub(crate) http_base: String,
    pub(crate) token_endpoint: String,
    pub(crate) force_token: bool,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
    pub(crate) single_utterance: bool,
    pub(crate) vad: Option<Map<String, Value>>,
    pub(crate) detect_thoughts: bool,
    pub(crate) ping_interval: Option<Duration>,
    pub(crate) ping_timeout: Duration,
    pub(crate) queue_max: usize,
    pub(crate) handshake_timeout: Duration,
    pub(crate) token_timeout: Duration,
}

impl SessionConfig {
    /// Create a new builder. The API key is validated in [`build()`](SessionConfigBuilder::build).
    pub fn builder(api_key: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(api_key)
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    pub fn http_base(&self) -> &str {
        &self.http_base
    }

    /// Full URL of the streaming-token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}{}", self.http_base, self.token_endpoint)
    }

    pub fn force_token(&self) -> bool {
        self.force_token
    }

    pub fn detect_thoughts(&self) -> bool {
        self.detect_thoughts
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    pub fn queue_max(&self) -> usize {
        self.queue_max
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }

    /// The `start` frame sent at the beginning of every connection.
    pub fn start_message(&self) -> StartMessage {
        StartMessage::new(
            self.sample_rate,
            self.channels,
            self.single_utterance,
            self.vad.clone(),
        )
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    api_key: String,
    ws_url: String,
    http_base: Option<String>,
    token_endpoint: String,
    force_token: bool,
    sample_rate: u32,
    channels: u16,
    single_utterance: bool,
    vad: Option<Map<String, Value>>,
    detect_thoughts: bool,
    ping_interval: Option<Duration>,
    ping_timeout: Duration,
    queue_max: usize,
    handshake_timeout: Duration,
    token_timeout: Duration,
}

impl SessionConfigBuilder {
    fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ws_url: DEFAULT_WS_URL.to_string(),
            http_base: None,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            force_token: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            single_utterance: false,
            vad: None,
            detect_thoughts: false,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            queue_max: DEFAULT_QUEUE_MAX,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// HTTP base used for the token request. Falls back to `FENNEC_BASE_URL`, then the default.
    pub fn http_base(mut self, base: impl Into<String>) -> Self {
        self.http_base = Some(base.into());
        self
    }

    pub fn token_endpoint(mut self, path: impl Into<String>) -> Self {
        self.token_endpoint = path.into();
        self
    }

    /// When false, the raw API key is placed in the WebSocket URL instead of a
    /// short-lived token. Only for servers that do not issue streaming tokens.
    pub fn force_token(mut self, force: bool) -> Self {
        self.force_token = force;
        self
    }

    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = hz;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn single_utterance(mut self, enabled: bool) -> Self {
        self.single_utterance = enabled;
        self
    }

    /// Voice-activity-detection parameters, forwarded verbatim in the `start` frame.
    pub fn vad(mut self, params: Map<String, Value>) -> Self {
        self.vad = Some(params);
        self
    }

    pub fn detect_thoughts(mut self, enabled: bool) -> Self {
        self.detect_thoughts = enabled;
        self
    }

    /// Interval between keepalive pings; `None` disables them.
    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn queue_max(mut self, capacity: usize) -> Self {
        self.queue_max = capacity;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the API key is empty, the WebSocket URL is not a
    /// `ws`/`wss` URL, or a numeric field is zero.
    pub fn build(self) -> Result<SessionConfig> {
        if self.api_key.is_empty() {
            return Err(Error::Config("api_key is required".into()));
        }

        let ws_url = Url::parse(&self.ws_url)
            .map_err(|e| Error::Config(format!("invalid ws_url '{}': {e}", self.ws_url)))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "ws_url must use ws:// or wss://, got '{}'",
                ws_url.scheme()
            )));
        }

        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channels must be positive".into()));
        }
        if self.queue_max == 0 {
            return Err(Error::Config("queue_max must be at least 1".into()));
        }

        let http_base = self
            .http_base
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(SessionConfig {
            api_key: SecretString::from(self.api_key),
            ws_url,
            http_base,
            token_endpoint: self.token_endpoint,
            force_token: self.force_token,
            sample_rate: self.sample_rate,
            channels: self.channels,
            single_utterance: self.single_utterance,
            vad: self.vad,
            detect_thoughts: self.detect_thoughts,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            queue_max: self.queue_max,
            handshake_timeout: self.handshake_timeout,
            token_timeout: self.token_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn empty_api_key_is_rejected() {
        let err = SessionConfig::builder("").build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("api_key")));
    }

    #[test]
    #[serial]
    fn defaults() {
        unsafe { std::env::remove_var(BASE_URL_ENV) };
        let config = SessionConfig::builder("key").build().unwrap();
        assert_eq!(config.ws_url().as_str(), DEFAULT_WS_URL);
        assert_eq!(config.http_base(), DEFAULT_HTTP_BASE);
        assert_eq!(
            config.token_url(),
            "https://api.fennec-asr.com/api/v1/transcribe/streaming-token"
        );
        assert!(config.force_token());
        assert!(!config.detect_thoughts());
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(20)));
        assert_eq!(config.ping_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue_max(), 128);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.token_timeout(), Duration::from_secs(15));
    }

    #[test]
    #[serial]
    fn base_url_env_override_and_trailing_slash() {
        unsafe { std::env::set_var(BASE_URL_ENV, "http://localhost:9000/api/") };
        let config = SessionConfig::builder("key").build().unwrap();
        assert_eq!(config.http_base(), "http://localhost:9000/api");

        let config = SessionConfig::builder("key")
            .http_base("https://explicit.example/")
            .build()
            .unwrap();
        assert_eq!(config.http_base(), "https://explicit.example");
        unsafe { std::env::remove_var(BASE_URL_ENV) };
    }

    #[test]
    fn invalid_ws_url_is_rejected() {
        let err = SessionConfig::builder("key")
            .ws_url("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SessionConfig::builder("key")
            .ws_url("https://api.example.com/stream")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ws://")));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let err = SessionConfig::builder("key").queue_max(0).build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("queue_max")));
    }

    #[test]
    fn start_message_reflects_config() {
        let mut vad = Map::new();
        vad.insert("threshold".into(), Value::from(0.6));
        let config = SessionConfig::builder("key")
            .sample_rate(8000)
            .channels(2)
            .single_utterance(true)
            .vad(vad)
            .build()
            .unwrap();
        let start = config.start_message();
        assert_eq!(start.sample_rate, 8000);
        assert_eq!(start.channels, 2);
        assert_eq!(start.single_utterance, Some(true));
        assert!(start.vad.is_some());
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let config = SessionConfig::builder("sk_secret_value").build().unwrap();
        assert!(!format!("{config:?}").contains("sk_secret_value"));
    }
}
