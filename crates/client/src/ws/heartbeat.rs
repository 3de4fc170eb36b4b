//! Application-level heartbeat for the live feed.
//!
//! The server only answers `ping` frames with `pong`; it never pings us. A
//! half-open TCP connection therefore goes unnoticed unless we keep asking,
//! so while a connection is open two timers run:
//!
//! - a ping timer that sends `{"type":"ping"}` every `ping_interval`;
//! - a watchdog that force-closes the socket once no pong arrived for longer
//!   than `pong_timeout`.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use srtmon_shared::{MessageEnvelope, HEARTBEAT_TIMEOUT_REASON, NORMAL_CLOSE_CODE};
use tokio::time::Instant;

use super::transport::{Outbound, OutboundSender};
use crate::timer::ScheduledTask;

const MIN_PERIOD: Duration = Duration::from_millis(1);
const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let ping_interval = Duration::from_secs(30);
        Self {
            ping_interval,
            pong_timeout: Self::timeout_for(ping_interval),
        }
    }
}

impl HeartbeatConfig {
    /// Pong timeout that tolerates one lost ping: two intervals plus a margin.
    pub fn timeout_for(ping_interval: Duration) -> Duration {
        ping_interval * 2 + TIMEOUT_MARGIN
    }

    pub fn watchdog_tick(&self) -> Duration {
        (self.pong_timeout / 10).max(MIN_PERIOD)
    }
}

/// Time of the last pong, shared between the monitor and its watchdog.
struct PongClock {
    base: Instant,
    last_pong_ms: AtomicU64,
}

impl PongClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            last_pong_ms: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_pong_ms.store(now, Ordering::Relaxed);
    }

    fn since_last_pong(&self) -> Duration {
        let last = Duration::from_millis(self.last_pong_ms.load(Ordering::Relaxed));
        self.base.elapsed().saturating_sub(last)
    }
}

/// Running heartbeat for one connection.
///
/// Both timers are cancelled when the monitor is stopped or dropped.
pub struct HeartbeatMonitor {
    clock: Arc<PongClock>,
    _ping: ScheduledTask,
    _watchdog: ScheduledTask,
}

impl HeartbeatMonitor {
    /// Start pinging through `outbound`. If the watchdog fires it queues a
    /// `1000 "Heartbeat timeout"` close and then calls `on_timeout` once.
    pub fn start<F>(config: &HeartbeatConfig, outbound: OutboundSender, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let clock = Arc::new(PongClock::new());

        let ping_tx = outbound.clone();
        let ping = ScheduledTask::every(config.ping_interval, move || {
            let frame = match MessageEnvelope::Ping.encode() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to encode ping: {}", e);
                    return ControlFlow::Break(());
                }
            };
            if ping_tx.unbounded_send(Outbound::Text(frame)).is_err() {
                // Socket writer is gone; the close path will stop us.
                return ControlFlow::Break(());
            }
            tracing::trace!("ping sent");
            ControlFlow::Continue(())
        });

        let pong_timeout = config.pong_timeout;
        let watched = clock.clone();
        let mut on_timeout = Some(on_timeout);
        let watchdog = ScheduledTask::every(config.watchdog_tick(), move || {
            let silent_for = watched.since_last_pong();
            if silent_for <= pong_timeout {
                return ControlFlow::Continue(());
            }
            tracing::warn!(
                "no pong for {}ms (timeout {}ms), closing live feed",
                silent_for.as_millis(),
                pong_timeout.as_millis()
            );
            let _ = outbound.unbounded_send(Outbound::Close {
                code: NORMAL_CLOSE_CODE,
                reason: HEARTBEAT_TIMEOUT_REASON.to_string(),
            });
            if let Some(notify) = on_timeout.take() {
                notify();
            }
            ControlFlow::Break(())
        });

        Self {
            clock,
            _ping: ping,
            _watchdog: watchdog,
        }
    }

    /// Record a pong; resets the watchdog baseline.
    pub fn observe_pong(&self) {
        self.clock.reset();
    }

    pub fn since_last_pong(&self) -> Duration {
        self.clock.since_last_pong()
    }

    pub fn stop(self) {}
}
