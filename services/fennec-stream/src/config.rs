use fennec_realtime::{SessionConfig, SessionConfigBuilder};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings read from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
    pub log_level: Level,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("FENNEC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("FENNEC_API_KEY".to_string()))?;

        let base_url = non_empty_var("FENNEC_BASE_URL");
        if let Some(base) = &base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(
                    "FENNEC_BASE_URL".to_string(),
                    format!("'{base}' is not an http(s) URL"),
                ));
            }
        }

        let ws_url = non_empty_var("FENNEC_WS_URL");
        if let Some(ws) = &ws_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                return Err(ConfigError::InvalidValue(
                    "FENNEC_WS_URL".to_string(),
                    format!("'{ws}' is not a ws(s) URL"),
                ));
            }
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_key,
            base_url,
            ws_url,
            log_level,
        })
    }

    /// A session builder seeded with the endpoints from the environment.
    pub fn session_builder(&self) -> SessionConfigBuilder {
        let mut builder = SessionConfig::builder(self.api_key.clone());
        if let Some(base) = &self.base_url {
            builder = builder.http_base(base.clone());
        }
        if let Some(ws) = &self.ws_url {
            builder = builder.ws_url(ws.clone());
        }
        builder
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
