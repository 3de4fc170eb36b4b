//! Routes decoded live-feed frames to their consumers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use srtmon_shared::{ChannelSnapshot, DecodeError, MessageEnvelope};
use tokio::sync::{broadcast, watch};

use super::heartbeat::HeartbeatMonitor;

const NOTICE_CAPACITY: usize = 64;
const UNKNOWN_ERROR: &str = "Unknown error";

/// Non-fatal condition reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ServerError {
        message: String,
        received_at: DateTime<Utc>,
    },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::ServerError { message, .. } => write!(f, "server error: {}", message),
        }
    }
}

/// What [`Dispatcher::handle`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Pong,
    /// A new snapshot with this many records was published.
    Channels(usize),
    Notice,
    /// Valid but not meant for us (unknown or client-originated type).
    Ignored,
    /// Malformed or invalid; nothing was published.
    Dropped,
}

/// Owns the published channel snapshot and the notice feed.
pub struct Dispatcher {
    snapshots: watch::Sender<Arc<ChannelSnapshot>>,
    notices: broadcast::Sender<Notice>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(ChannelSnapshot::default()));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { snapshots, notices }
    }

    pub fn subscribe_channels(&self) -> watch::Receiver<Arc<ChannelSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.notices.clone()
    }

    /// The most recently published snapshot.
    pub fn channels(&self) -> Arc<ChannelSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Handle one inbound text frame. Never fails: bad frames are logged and
    /// dropped.
    pub fn handle(&self, raw: &str, heartbeat: Option<&HeartbeatMonitor>) -> Dispatched {
        let envelope = match MessageEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(DecodeError::UnknownType(tag)) => {
                tracing::debug!("ignoring live feed message of unknown type `{}`", tag);
                return Dispatched::Ignored;
            }
            Err(e) => {
                tracing::warn!("dropping live feed frame: {}", e);
                return Dispatched::Dropped;
            }
        };

        match envelope {
            MessageEnvelope::Pong { .. } => {
                if let Some(heartbeat) = heartbeat {
                    heartbeat.observe_pong();
                }
                Dispatched::Pong
            }
            MessageEnvelope::ChannelUpdate { channels, .. } => {
                let count = channels.len();
                self.snapshots.send_replace(Arc::new(channels));
                tracing::debug!("channel snapshot updated ({} channels)", count);
                Dispatched::Channels(count)
            }
            MessageEnvelope::Error { message } => {
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                tracing::warn!("server reported: {}", message);
                // No subscribers is fine; the log line above is the fallback.
                let _ = self.notices.send(Notice::ServerError {
                    message,
                    received_at: Utc::now(),
                });
                Dispatched::Notice
            }
            other @ (MessageEnvelope::Ping | MessageEnvelope::GetChannels) => {
                tracing::debug!(
                    "ignoring client-originated `{}` from server",
                    other.message_type().as_str()
                );
                Dispatched::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATE: &str = r#"{"type":"channel_update","channels":[{"channel_name":"cam1"},{"channel_name":"cam2"}]}"#;

    #[test]
    fn channel_update_replaces_snapshot() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe_channels();
        assert!(dispatcher.channels().is_empty());

        assert_eq!(dispatcher.handle(UPDATE, None), Dispatched::Channels(2));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().names(), vec!["cam1", "cam2"]);

        let replacement = r#"{"type":"channel_update","channels":[{"channel_name":"cam3"}]}"#;
        dispatcher.handle(replacement, None);
        assert_eq!(dispatcher.channels().names(), vec!["cam3"]);
    }

    #[test]
    fn invalid_update_leaves_snapshot_unchanged() {
        let dispatcher = Dispatcher::new();
        dispatcher.handle(UPDATE, None);
        let rx = dispatcher.subscribe_channels();
        let before = dispatcher.channels();

        for bad in [
            r#"{"type":"channel_update"}"#,
            r#"{"type":"channel_update","channels":null}"#,
            r#"{"type":"channel_update","channels":{"channel_name":"x"}}"#,
            r#"{"type":"channel_update","channels":[{"channel_name":"x"},"oops"]}"#,
            "{not json",
        ] {
            assert_eq!(dispatcher.handle(bad, None), Dispatched::Dropped, "{bad}");
        }

        assert!(!rx.has_changed().unwrap());
        assert!(Arc::ptr_eq(&before, &dispatcher.channels()));
    }

    #[test]
    fn error_becomes_notice() {
        let dispatcher = Dispatcher::new();
        let mut notices = dispatcher.subscribe_notices();

        dispatcher.handle(r#"{"type":"error","message":"Channel not found"}"#, None);
        dispatcher.handle(r#"{"type":"error"}"#, None);

        let Notice::ServerError { message, .. } = notices.try_recv().unwrap();
        assert_eq!(message, "Channel not found");
        let Notice::ServerError { message, .. } = notices.try_recv().unwrap();
        assert_eq!(message, "Unknown error");
    }

    #[test]
    fn unknown_and_echoed_types_are_ignored() {
        let dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.handle(r#"{"type":"stats_push"}"#, None),
            Dispatched::Ignored
        );
        assert_eq!(dispatcher.handle(r#"{"type":"ping"}"#, None), Dispatched::Ignored);
        assert!(dispatcher.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pong_resets_heartbeat() {
        let (tx, _rx) = futures_channel::mpsc::unbounded();
        let heartbeat = HeartbeatMonitor::start(&Default::default(), tx, || {});
        tokio::time::sleep(std::time::Duration::from_secs(20)).await;
        assert!(heartbeat.since_last_pong() >= std::time::Duration::from_secs(20));

        let dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.handle(r#"{"type":"pong","timestamp":"now"}"#, Some(&heartbeat)),
            Dispatched::Pong
        );
        assert!(heartbeat.since_last_pong() < std::time::Duration::from_secs(1));
    }
}
