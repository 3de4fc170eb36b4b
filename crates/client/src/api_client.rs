//! HTTP API client for the dashboard REST endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use srtmon_shared::{AnalyticsSummary, ApiError, ChannelSnapshot, ServerStats, StreamInfoMap};

use crate::config::SyncConfig;
use crate::credentials::TokenSource;

/// The REST sources the dashboard poller reads.
#[async_trait]
pub trait DashboardSource: Send + Sync + 'static {
    async fn channels(&self) -> Result<ChannelSnapshot, ApiError>;
    async fn analytics_summary(&self) -> Result<AnalyticsSummary, ApiError>;
    async fn stream_info(&self) -> Result<StreamInfoMap, ApiError>;
    async fn server_stats(&self) -> Result<ServerStats, ApiError>;
}

/// HTTP client for the backend API.
///
/// The bearer token is read from the [`TokenSource`] on every request, so a
/// login or logout takes effect on the next call.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            tokens: None,
        }
    }

    /// Client for `config.api_url` with `config.request_timeout` applied to
    /// every request.
    pub fn from_config(config: &SyncConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_url.as_str().to_string(),
            tokens: Some(tokens),
        })
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach bearer credentials
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        let mut rb = self.client.get(&url);

        if let Some(token) = self.tokens.as_ref().and_then(|t| t.token()) {
            rb = rb.bearer_auth(token);
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp.text().await.map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            tracing::debug!("GET {} -> HTTP {}", path, status);
            return Err(ApiError::from_status(status, text));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// List all channels
    pub async fn list_channels(&self) -> Result<ChannelSnapshot, ApiError> {
        self.get_json("/api/channels").await
    }

    /// Dashboard-wide analytics with per-channel quick stats
    pub async fn get_analytics_summary(&self) -> Result<AnalyticsSummary, ApiError> {
        self.get_json("/api/channels/analytics/summary").await
    }

    /// Stream info for every channel, keyed by channel name
    pub async fn get_all_stream_info(&self) -> Result<StreamInfoMap, ApiError> {
        self.get_json("/api/channels/stream-info/all").await
    }

    /// Host CPU, memory and network figures
    pub async fn get_server_stats(&self) -> Result<ServerStats, ApiError> {
        self.get_json("/api/system/stats").await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DashboardSource for ApiClient {
    async fn channels(&self) -> Result<ChannelSnapshot, ApiError> {
        self.list_channels().await
    }

    async fn analytics_summary(&self) -> Result<AnalyticsSummary, ApiError> {
        self.get_analytics_summary().await
    }

    async fn stream_info(&self) -> Result<StreamInfoMap, ApiError> {
        self.get_all_stream_info().await
    }

    async fn server_stats(&self) -> Result<ServerStats, ApiError> {
        self.get_server_stats().await
    }
}
