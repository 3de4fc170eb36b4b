//! Connection state, reconnect policy and terminal errors.

use std::time::Duration;

use thiserror::Error;

/// Connection state of the live feed, as published to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Handshake in progress. `attempt` is 0 for a first connect and counts
    /// up across automatic reconnects.
    Connecting { attempt: u32 },
    Connected,
    /// Not connected. `retry_in` is set while a reconnect is scheduled.
    Disconnected { retry_in: Option<Duration> },
    /// Gave up; only an explicit `connect()` leaves this state.
    Failed(SyncError),
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected { retry_in: None }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }

    /// True for states that will not change without an explicit call.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed(_) | ConnectionState::Disconnected { retry_in: None }
        )
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            ConnectionState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting { attempt: 0 } => write!(f, "connecting"),
            ConnectionState::Connecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected { retry_in: None } => write!(f, "disconnected"),
            ConnectionState::Disconnected { retry_in: Some(delay) } => {
                write!(f, "disconnected, retrying in {}ms", delay.as_millis())
            }
            ConnectionState::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Why the connection gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no credential available")]
    AuthenticationRequired,
    #[error("server rejected the credential: {reason}")]
    AuthenticationRejected { reason: String },
    #[error("gave up after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
}

impl SyncError {
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationRequired | SyncError::AuthenticationRejected { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub cap: Duration,
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(3000),
            multiplier: 1.5,
            cap: Duration::from_millis(30000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap_ms = self.cap.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (self.base.as_millis() as f64 * self.multiplier.powi(exponent)).round();
        if !delay_ms.is_finite() || delay_ms >= cap_ms {
            self.cap
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Whether another attempt may follow `attempts` consecutive failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..8)
            .map(|n| policy.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![3000, 4500, 6750, 10125, 15188, 22781, 30000, 30000]
        );
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(250),
            multiplier: 2.0,
            cap: Duration::from_secs(5),
            max_attempts: 0,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= policy.cap);
            previous = delay;
        }
        assert_eq!(previous, policy.cap);
    }

    #[test]
    fn attempt_limit() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(9));
        assert!(!policy.allows(10));

        let forever = ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        };
        assert!(forever.allows(u32::MAX));
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connecting { attempt: 0 }.to_string(), "connecting");
        assert_eq!(
            ConnectionState::Disconnected {
                retry_in: Some(Duration::from_millis(4500))
            }
            .to_string(),
            "disconnected, retrying in 4500ms"
        );
        assert!(ConnectionState::Failed(SyncError::AuthenticationRequired).is_settled());
        assert!(!ConnectionState::Disconnected {
            retry_in: Some(Duration::from_secs(3))
        }
        .is_settled());
    }
}
