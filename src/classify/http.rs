//! HTTP transport to the local classification service.
//! JSON over POST, connection pooling via reqwest. No retries and no timeout
//! of our own: a request always runs to whatever the transport resolves.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{ClassifyError, ClassifyRequest, Classifier, RemoteVerdict};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

pub struct HttpClassifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClassifier {
    pub fn new(base_url: &str) -> Result<Self, ClassifyError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("feedguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`. Ok means the service is online.
    pub async fn health(&self) -> Result<(), ClassifyError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }
        debug!(status = status.as_u16(), "health_ok");
        Ok(())
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<RemoteVerdict, ClassifyError> {
        let route = request.kind.route();
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, route.endpoint))
            .json(&request.body())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }

        resp.json::<RemoteVerdict>()
            .await
            .map_err(|e| ClassifyError::Decode(e.to_string()))
    }
}
