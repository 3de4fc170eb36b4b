//! REST payloads consumed by the dashboard poller.
//!
//! Only the fields the poller merges on are typed. Everything else is kept
//! as raw JSON so backend additions pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// `GET /api/channels/analytics/summary`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSummary {
    pub total_channels: u32,
    pub running: u32,
    pub stopped: u32,
    pub total_bandwidth_mbps: f64,
    pub total_send_rate_mbps: f64,
    pub total_recv_rate_mbps: f64,
    pub total_packet_loss: f64,
    pub avg_rtt_ms: f64,
    pub channels: Vec<ChannelAnalytics>,
}

impl AnalyticsSummary {
    /// Aggregate figures without the per-channel breakdown.
    pub fn totals(&self) -> AnalyticsTotals {
        AnalyticsTotals {
            total_channels: self.total_channels,
            running: self.running,
            stopped: self.stopped,
            total_bandwidth_mbps: self.total_bandwidth_mbps,
            total_send_rate_mbps: self.total_send_rate_mbps,
            total_recv_rate_mbps: self.total_recv_rate_mbps,
            total_packet_loss: self.total_packet_loss,
            avg_rtt_ms: self.avg_rtt_ms,
        }
    }
}

/// Dashboard-wide analytics figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsTotals {
    pub total_channels: u32,
    pub running: u32,
    pub stopped: u32,
    pub total_bandwidth_mbps: f64,
    pub total_send_rate_mbps: f64,
    pub total_recv_rate_mbps: f64,
    pub total_packet_loss: f64,
    pub avg_rtt_ms: f64,
}

/// Per-channel quick stats inside an [`AnalyticsSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAnalytics {
    pub name: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// `GET /api/channels/stream-info/all`, keyed by channel name.
pub type StreamInfoMap = HashMap<String, Value>;

/// `GET /api/system/stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
    pub network_rate_sent_mbps: f64,
    pub network_rate_recv_mbps: f64,
}
