//! Connection URL construction.

use std::fmt;

use url::Url;

/// A query-string value. Booleans render as lowercase `true` / `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Str(String),
    Bool(bool),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Str(s) => f.write_str(s),
            QueryValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::Str(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        QueryValue::Str(s)
    }
}

impl From<bool> for QueryValue {
    fn from(b: bool) -> Self {
        QueryValue::Bool(b)
    }
}

/// Merges `extra` into the query string of `base`.
///
/// Existing parameters are kept in place; a key present in both takes the new value.
/// Entries whose value is `None` are skipped entirely. Repeated keys in the base
/// collapse to one entry holding the last value.
pub fn with_query(base: &Url, extra: &[(&str, Option<QueryValue>)]) -> Url {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut upsert = |key: String, value: String| {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    };

    for (key, value) in base.query_pairs() {
        upsert(key.into_owned(), value.into_owned());
    }
    for (key, value) in extra {
        if let Some(value) = value {
            upsert((*key).to_string(), value.to_string());
        }
    }

    let mut url = base.clone();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

/// `Some(true)` when enabled; absent otherwise.
pub(crate) fn flag(enabled: bool) -> Option<QueryValue> {
    enabled.then_some(QueryValue::Bool(true))
}

/// Connection URL for the preferred path: a short-lived streaming token.
pub fn token_url(base: &Url, token: &str, detect_thoughts: bool) -> Url {
    with_query(
        base,
        &[
            ("streaming_token", Some(token.into())),
            ("detect_thoughts", flag(detect_thoughts)),
        ],
    )
}

/// Connection URL for the legacy path that carries the raw API key.
pub fn api_key_url(base: &Url, api_key: &str, detect_thoughts: bool) -> Url {
    with_query(
        base,
        &[
            ("api_key", Some(api_key.into())),
            ("detect_thoughts", flag(detect_thoughts)),
        ],
    )
}

/// The URL without its query string, for logging.
pub(crate) fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
