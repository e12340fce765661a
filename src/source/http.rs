//! Shared HTTP policy for source adapters.
//!
//! Every adapter builds its client here so timeouts, compression and the
//! User-Agent stay consistent across sites.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use super::SourceError;
use crate::fetch::Throttle;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/paperspider/paperspider";

/// Default User-Agent for all adapter traffic.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("paperspider/{version} (research-tool; +{PROJECT_UA_URL})")
}

/// Network settings shared by every adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout; an expired timeout surfaces as `SourceUnavailable`.
    pub read_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpSettings {
    /// Settings with explicit timeouts and the default User-Agent.
    #[must_use]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            read_timeout: Duration::from_secs(read_timeout_secs),
            ..Self::default()
        }
    }
}

/// Thin client wrapper that maps transport and status failures to [`SourceError`].
#[derive(Debug, Clone)]
pub(crate) struct HttpFetcher {
    client: Client,
    site: &'static str,
}

impl HttpFetcher {
    /// Builds a client for `site` using shared settings.
    pub(crate) fn new(site: &'static str, settings: &HttpSettings) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .user_agent(settings.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(|e| {
                SourceError::unavailable(site, format!("HTTP client construction failed: {e}"))
            })?;
        Ok(Self { client, site })
    }

    /// GETs `url` and returns the body as text.
    ///
    /// 404/410 map to `NotFound`; other non-success statuses and transport
    /// failures map to `SourceUnavailable`.
    pub(crate) async fn get_text(&self, url: &str, gate: &Throttle) -> Result<String, SourceError> {
        let response = self.send(url, gate).await?;
        response
            .text()
            .await
            .map_err(|e| self.transport_error(url, &e))
    }

    /// GETs `url` and parses the body as JSON.
    pub(crate) async fn get_json(
        &self,
        url: &Url,
        gate: &Throttle,
    ) -> Result<serde_json::Value, SourceError> {
        let text = self.get_text(url.as_str(), gate).await?;
        serde_json::from_str(&text).map_err(|_| SourceError::unrecognized(self.site, url.as_str()))
    }

    /// GETs `url` and collects the streamed body.
    pub(crate) async fn get_bytes(&self, url: &str, gate: &Throttle) -> Result<Vec<u8>, SourceError> {
        let response = self.send(url, gate).await?;
        let mut body = Vec::with_capacity(
            response
                .content_length()
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or_default(),
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(url, &e))?;
            body.extend_from_slice(&chunk);
        }
        debug!(site = self.site, url, bytes = body.len(), "body downloaded");
        Ok(body)
    }

    /// Waits for `gate`, then issues one GET.
    async fn send(&self, url: &str, gate: &Throttle) -> Result<Response, SourceError> {
        gate.acquire().await;
        debug!(site = self.site, url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Err(SourceError::not_found(self.site, "page", url));
        }
        Err(SourceError::unavailable(
            self.site,
            format!("HTTP {} from {url}", status.as_u16()),
        ))
    }

    fn transport_error(&self, url: &str, error: &reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::unavailable(self.site, format!("request to {url} timed out"))
        } else {
            SourceError::unavailable(self.site, format!("request to {url} failed: {error}"))
        }
    }
}
