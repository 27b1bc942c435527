//! Classification client: request/response types, the media route table and
//! the transport trait the remote classifier sits behind.

pub mod http;
pub mod service;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpClassifier;
pub use service::ClassificationService;

/// Reason reported when no filters are configured.
pub const REASON_NO_FILTERS: &str = "No filters set";
/// Reason reported for any transport or status failure (fail-open).
pub const REASON_BACKEND_ERROR: &str = "Backend error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Where a media kind is classified and which request field carries its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub endpoint: &'static str,
    pub url_field: &'static str,
}

const ROUTES: [Route; 2] = [
    Route {
        endpoint: "/filter-image",
        url_field: "image_url",
    },
    Route {
        endpoint: "/filter-video",
        url_field: "video_url",
    },
];

impl MediaKind {
    pub const fn route(self) -> &'static Route {
        match self {
            MediaKind::Image => &ROUTES[0],
            MediaKind::Video => &ROUTES[1],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLevel {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for FilterLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(FilterLevel::Low),
            "normal" => Ok(FilterLevel::Normal),
            "high" => Ok(FilterLevel::High),
            other => Err(format!("unknown filter level: {other}")),
        }
    }
}

/// One user filter term. Opaque to the pipeline; passed through to the
/// classifier as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserFilter {
    pub term: String,
    #[serde(default)]
    pub level: FilterLevel,
}

impl UserFilter {
    pub fn new(term: impl Into<String>, level: FilterLevel) -> Self {
        Self {
            term: term.into(),
            level,
        }
    }
}

/// `term` or `term:level`.
impl FromStr for UserFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (term, level) = match s.rsplit_once(':') {
            Some((term, level)) => (term, level.parse()?),
            None => (s, FilterLevel::default()),
        };
        let term = term.trim();
        if term.is_empty() {
            return Err("empty filter term".to_string());
        }
        Ok(UserFilter::new(term, level))
    }
}

/// Final classification outcome for one media item. Immutable once built;
/// shared between the cache and the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub should_block: bool,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verdict {
    pub fn allow(kind: MediaKind, reason: &str) -> Self {
        Self {
            should_block: false,
            reason: reason.to_string(),
            kind,
            error: None,
        }
    }

    pub fn backend_error(kind: MediaKind, error: &ClassifyError) -> Self {
        Self {
            should_block: false,
            reason: REASON_BACKEND_ERROR.to_string(),
            kind,
            error: Some(error.to_string()),
        }
    }

    pub fn from_remote(kind: MediaKind, remote: RemoteVerdict) -> Self {
        Self {
            should_block: remote.should_block,
            reason: remote.reason,
            kind,
            error: None,
        }
    }
}

/// Response body of the classification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVerdict {
    pub should_block: bool,
    #[serde(default)]
    pub reason: String,
}

/// One outbound classification request.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub url: &'a str,
    pub filters: &'a [UserFilter],
    pub kind: MediaKind,
}

impl ClassifyRequest<'_> {
    /// JSON body: `{ "<image_url|video_url>": url, "user_filters": [...] }`.
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert(
            self.kind.route().url_field.to_string(),
            serde_json::Value::String(self.url.to_string()),
        );
        body.insert("user_filters".to_string(), serde_json::json!(self.filters));
        serde_json::Value::Object(body)
    }
}

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    Status(u16),

    #[error("invalid classifier response: {0}")]
    Decode(String),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

/// Transport to the remote classifier. One call, one outbound request.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<RemoteVerdict, ClassifyError>;
}

/// Cache key for a media item: `mediaType:url`.
pub fn cache_key(kind: MediaKind, url: &str) -> String {
    format!("{}:{}", kind.as_str(), url)
}
