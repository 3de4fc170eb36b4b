//! Immutable dashboard snapshot built from one polling tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use srtmon_shared::{
    record_name, AnalyticsSummary, AnalyticsTotals, ApiError, ChannelAnalytics, ChannelRecord,
    ChannelSnapshot, ServerStats, StreamInfoMap,
};

/// Last known state of one REST source.
#[derive(Debug)]
pub enum SourceSlot<T> {
    /// Not fetched yet.
    Pending,
    /// Never fetched successfully.
    Unavailable { error: ApiError },
    Fresh {
        value: Arc<T>,
        fetched_at: DateTime<Utc>,
    },
    /// Latest fetch failed; `value` is from `fetched_at`, failing since `since`.
    Stale {
        value: Arc<T>,
        fetched_at: DateTime<Utc>,
        since: DateTime<Utc>,
        error: ApiError,
    },
}

impl<T> Clone for SourceSlot<T> {
    fn clone(&self) -> Self {
        match self {
            SourceSlot::Pending => SourceSlot::Pending,
            SourceSlot::Unavailable { error } => SourceSlot::Unavailable {
                error: error.clone(),
            },
            SourceSlot::Fresh { value, fetched_at } => SourceSlot::Fresh {
                value: value.clone(),
                fetched_at: *fetched_at,
            },
            SourceSlot::Stale {
                value,
                fetched_at,
                since,
                error,
            } => SourceSlot::Stale {
                value: value.clone(),
                fetched_at: *fetched_at,
                since: *since,
                error: error.clone(),
            },
        }
    }
}

impl<T> Default for SourceSlot<T> {
    fn default() -> Self {
        SourceSlot::Pending
    }
}

/// Health of a source as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    Pending,
    Fresh,
    Stale { since: DateTime<Utc> },
    Unavailable,
}

impl SourceHealth {
    pub fn is_failing(&self) -> bool {
        matches!(self, SourceHealth::Stale { .. } | SourceHealth::Unavailable)
    }
}

impl<T> SourceSlot<T> {
    /// The freshest value available, stale or not.
    pub fn value(&self) -> Option<&T> {
        match self {
            SourceSlot::Fresh { value, .. } | SourceSlot::Stale { value, .. } => Some(value),
            SourceSlot::Pending | SourceSlot::Unavailable { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            SourceSlot::Unavailable { error } | SourceSlot::Stale { error, .. } => Some(error),
            SourceSlot::Pending | SourceSlot::Fresh { .. } => None,
        }
    }

    pub fn health(&self) -> SourceHealth {
        match self {
            SourceSlot::Pending => SourceHealth::Pending,
            SourceSlot::Fresh { .. } => SourceHealth::Fresh,
            SourceSlot::Stale { since, .. } => SourceHealth::Stale { since: *since },
            SourceSlot::Unavailable { .. } => SourceHealth::Unavailable,
        }
    }

    /// Apply one fetch result. A failure keeps the last good value.
    pub fn advance(&self, result: Result<T, ApiError>, now: DateTime<Utc>) -> Self {
        match (result, self) {
            (Ok(value), _) => SourceSlot::Fresh {
                value: Arc::new(value),
                fetched_at: now,
            },
            (Err(error), SourceSlot::Fresh { value, fetched_at }) => SourceSlot::Stale {
                value: value.clone(),
                fetched_at: *fetched_at,
                since: now,
                error,
            },
            (
                Err(error),
                SourceSlot::Stale {
                    value,
                    fetched_at,
                    since,
                    ..
                },
            ) => SourceSlot::Stale {
                value: value.clone(),
                fetched_at: *fetched_at,
                since: *since,
                error,
            },
            (Err(error), SourceSlot::Pending | SourceSlot::Unavailable { .. }) => {
                SourceSlot::Unavailable { error }
            }
        }
    }
}

/// Results of one tick, one per source.
#[derive(Debug)]
pub struct TickResults {
    pub channel_list: Result<ChannelSnapshot, ApiError>,
    pub analytics: Result<AnalyticsSummary, ApiError>,
    pub stream_info: Result<StreamInfoMap, ApiError>,
    pub host: Result<ServerStats, ApiError>,
}

/// Everything known about one channel, merged across sources.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelView {
    /// Record from the channel list.
    pub record: Option<ChannelRecord>,
    pub analytics: Option<ChannelAnalytics>,
    pub stream_info: Option<Value>,
}

/// Health of every source in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcesHealth {
    pub channel_list: SourceHealth,
    pub analytics: SourceHealth,
    pub stream_info: SourceHealth,
    pub host: SourceHealth,
}

impl SourcesHealth {
    pub fn all_fresh(&self) -> bool {
        [self.channel_list, self.analytics, self.stream_info, self.host]
            .iter()
            .all(|h| *h == SourceHealth::Fresh)
    }
}

/// The merged dashboard. Published once per tick and never mutated.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    /// Number of ticks merged so far; 0 before the first.
    pub tick: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub channel_list: SourceSlot<ChannelSnapshot>,
    pub analytics: SourceSlot<AnalyticsSummary>,
    pub stream_info: SourceSlot<StreamInfoMap>,
    pub host: SourceSlot<ServerStats>,
    /// Per-channel view keyed by channel name.
    pub channels: BTreeMap<String, ChannelView>,
}

impl DashboardView {
    /// The view that follows `self` after a tick with `results`.
    pub fn advance(&self, results: TickResults, now: DateTime<Utc>) -> Self {
        let channel_list = self.channel_list.advance(results.channel_list, now);
        let analytics = self.analytics.advance(results.analytics, now);
        let stream_info = self.stream_info.advance(results.stream_info, now);
        let host = self.host.advance(results.host, now);
        let channels = merge_channels(channel_list.value(), analytics.value(), stream_info.value());

        Self {
            tick: self.tick + 1,
            fetched_at: Some(now),
            channel_list,
            analytics,
            stream_info,
            host,
            channels,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelView> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn totals(&self) -> Option<AnalyticsTotals> {
        self.analytics.value().map(AnalyticsSummary::totals)
    }

    pub fn host(&self) -> Option<&ServerStats> {
        self.host.value()
    }

    pub fn sources(&self) -> SourcesHealth {
        SourcesHealth {
            channel_list: self.channel_list.health(),
            analytics: self.analytics.health(),
            stream_info: self.stream_info.health(),
            host: self.host.health(),
        }
    }
}

fn merge_channels(
    list: Option<&ChannelSnapshot>,
    analytics: Option<&AnalyticsSummary>,
    stream_info: Option<&StreamInfoMap>,
) -> BTreeMap<String, ChannelView> {
    let mut channels: BTreeMap<String, ChannelView> = BTreeMap::new();

    for record in list.into_iter().flat_map(ChannelSnapshot::iter) {
        if let Some(name) = record_name(record) {
            channels.entry(name.to_string()).or_default().record = Some(record.clone());
        }
    }
    for entry in analytics.into_iter().flat_map(|a| a.channels.iter()) {
        channels.entry(entry.name.clone()).or_default().analytics = Some(entry.clone());
    }
    for (name, info) in stream_info.into_iter().flatten() {
        channels.entry(name.clone()).or_default().stream_info = Some(info.clone());
    }

    channels
}
