//! Client configuration from environment variables.

use std::time::Duration;

use srtmon_shared::WS_PATH;
use url::Url;

use crate::ws::{HeartbeatConfig, ReconnectPolicy};

const DEFAULT_WS_URL: &str = "ws://localhost:8000";
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Everything the sync core needs to reach the backend.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the live feed; `/ws` is appended.
    pub ws_url: Url,
    /// Base URL of the REST API.
    pub api_url: Url,
    /// Fixed bearer token. When set it takes precedence over the stored session.
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatConfig,
    /// Give up on a WebSocket handshake after this long.
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: default_url(DEFAULT_WS_URL),
            api_url: default_url(DEFAULT_API_URL),
            token: None,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Build the configuration from the process environment.
    ///
    /// Environment variables:
    /// - `SRTMON_WS_URL`: live feed base URL (default: "ws://localhost:8000")
    /// - `SRTMON_API_URL`: REST base URL (default: "http://localhost:8000")
    /// - `SRTMON_TOKEN`: fixed bearer token (default: read the stored session)
    /// - `SRTMON_POLL_INTERVAL_MS` (default: 3000)
    /// - `SRTMON_PING_INTERVAL_MS` (default: 30000)
    /// - `SRTMON_PONG_TIMEOUT_MS` (default: 65000)
    /// - `SRTMON_RECONNECT_BASE_MS` (default: 3000)
    /// - `SRTMON_RECONNECT_MULTIPLIER` (default: 1.5)
    /// - `SRTMON_RECONNECT_MAX_MS` (default: 30000)
    /// - `SRTMON_RECONNECT_MAX_ATTEMPTS` (default: 10, 0 = retry forever)
    /// - `SRTMON_CONNECT_TIMEOUT_MS` (default: 10000)
    /// - `SRTMON_REQUEST_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`SyncConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let url = |name: &str, fallback: Url| match lookup(name) {
            Some(raw) => match Url::parse(raw.trim()) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("{} is not a valid URL ({}), using {}", name, e, fallback);
                    fallback
                }
            },
            None => fallback,
        };
        let millis = |name: &str, fallback: Duration| match lookup(name) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!("{}={:?} is not a number of milliseconds, using {:?}", name, raw, fallback);
                    fallback
                }
            },
            None => fallback,
        };

        let reconnect = ReconnectPolicy {
            base: millis("SRTMON_RECONNECT_BASE_MS", defaults.reconnect.base),
            multiplier: match lookup("SRTMON_RECONNECT_MULTIPLIER").map(|v| v.trim().parse::<f64>()) {
                Some(Ok(m)) if m >= 1.0 => m,
                Some(_) => {
                    tracing::warn!(
                        "SRTMON_RECONNECT_MULTIPLIER must be a number >= 1, using {}",
                        defaults.reconnect.multiplier
                    );
                    defaults.reconnect.multiplier
                }
                None => defaults.reconnect.multiplier,
            },
            cap: millis("SRTMON_RECONNECT_MAX_MS", defaults.reconnect.cap),
            max_attempts: match lookup("SRTMON_RECONNECT_MAX_ATTEMPTS").map(|v| v.trim().parse::<u32>()) {
                Some(Ok(n)) => n,
                Some(Err(_)) => {
                    tracing::warn!(
                        "SRTMON_RECONNECT_MAX_ATTEMPTS is not a number, using {}",
                        defaults.reconnect.max_attempts
                    );
                    defaults.reconnect.max_attempts
                }
                None => defaults.reconnect.max_attempts,
            },
        };

        let ping_interval = millis("SRTMON_PING_INTERVAL_MS", defaults.heartbeat.ping_interval);
        let heartbeat = HeartbeatConfig {
            ping_interval,
            pong_timeout: millis(
                "SRTMON_PONG_TIMEOUT_MS",
                HeartbeatConfig::timeout_for(ping_interval),
            ),
        };

        Self {
            ws_url: url("SRTMON_WS_URL", defaults.ws_url),
            api_url: url("SRTMON_API_URL", defaults.api_url),
            token: lookup("SRTMON_TOKEN"),
            reconnect,
            heartbeat,
            connect_timeout: millis("SRTMON_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            poll_interval: millis("SRTMON_POLL_INTERVAL_MS", defaults.poll_interval),
            request_timeout: millis("SRTMON_REQUEST_TIMEOUT_MS", defaults.request_timeout),
        }
    }

    /// Live feed URL carrying `token` as the `token` query parameter.
    ///
    /// `http`/`https` base URLs are converted to `ws`/`wss`.
    pub fn ws_endpoint(&self, token: &str) -> Url {
        let mut url = self.ws_url.clone();
        let scheme = match url.scheme() {
            "https" => Some("wss"),
            "http" => Some("ws"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            let _ = url.set_scheme(scheme);
        }
        let path = format!("{}{}", url.path().trim_end_matches('/'), WS_PATH);
        url.set_path(&path);
        url.set_query(None);
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in default URL is valid")
}
