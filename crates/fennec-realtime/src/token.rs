//! Exchange of the long-lived API key for a short-lived streaming token.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// Blocking key-to-token exchange.
///
/// Sessions call this from a blocking-capable thread, never on the async scheduler.
pub trait TokenFetcher: Send + Sync + 'static {
    fn fetch_token(&self, api_key: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Fetches tokens from `GET {http_base}{token_endpoint}`, retrying once with `POST`
/// when the server answers `405 Method Not Allowed`.
#[derive(Debug, Clone)]
pub struct HttpTokenFetcher {
    url: String,
    timeout: Duration,
}

impl HttpTokenFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn with_headers(request: RequestBuilder, api_key: &str) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        if api_key.is_empty() {
            request
        } else {
            request.header("X-API-Key", api_key)
        }
    }
}

impl TokenFetcher for HttpTokenFetcher {
    fn fetch_token(&self, api_key: &str) -> Result<String> {
        // Built per call: a blocking client must not be dropped on an async worker.
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::token_fetch(None, format!("failed to build HTTP client: {e}")))?;

        debug!(url = %self.url, "requesting streaming token");
        let send = |request: RequestBuilder| {
            Self::with_headers(request, api_key)
                .send()
                .map_err(|e| Error::token_fetch(None, format!("token request failed: {e}")))
        };

        let mut response = send(client.get(&self.url))?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            debug!("token endpoint rejected GET, retrying with POST");
            response = send(client.post(&self.url))?;
        }

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| Error::token_fetch(Some(status.as_u16()), format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(Error::token_fetch(
                Some(status.as_u16()),
                format!("Token fetch failed (HTTP {}): {body}", status.as_u16()),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::token_fetch(Some(status.as_u16()), format!("Invalid token response: {e}"))
        })?;

        match parsed.token.filter(|t| !t.is_empty()) {
            Some(token) => {
                info!("streaming token acquired");
                Ok(token)
            }
            None => Err(Error::token_fetch(
                Some(status.as_u16()),
                "Missing 'token' in token response",
            )),
        }
    }
}
