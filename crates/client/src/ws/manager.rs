//! Live feed connection manager.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to a single actor task
//! that owns the socket. Commands from handles, socket events, timer expiry
//! and credential changes all arrive at that task and are processed one at a
//! time, so the connection state and attempt counter are never raced.
//!
//! ```text
//!   handle ──Command──┐
//!   reader ──Event────┤
//!   timers ──Event────┼──▶ Actor ──▶ watch<ConnectionState>
//!   tokens ──changed──┘       │
//!                             └────▶ Dispatcher ──▶ watch<ChannelSnapshot>
//!                                               └─▶ broadcast<Notice>
//! ```
//!
//! Each connection attempt gets a new generation number. Events carry the
//! generation they belong to and anything from an older one is ignored, which
//! is what keeps a late handshake or close from touching a newer connection.

use std::sync::Arc;
use std::time::Duration;

use srtmon_shared::{ChannelSnapshot, MessageEnvelope, AUTH_REJECTED_CLOSE_CODE, NORMAL_CLOSE_CODE};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::connection::{ConnectionState, ReconnectPolicy, SyncError};
use super::dispatcher::{Dispatcher, Notice};
use super::heartbeat::HeartbeatMonitor;
use super::transport::{Connector, Inbound, Outbound, OutboundSender, Transport, TransportError, WsConnector};
use crate::config::SyncConfig;
use crate::credentials::TokenSource;
use crate::timer::ScheduledTask;

const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";

enum Command {
    Connect,
    Disconnect,
    Send(MessageEnvelope),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Opened { generation: u64, transport: Transport },
    OpenFailed { generation: u64, error: TransportError },
    Frame { generation: u64, text: String },
    Closed { generation: u64, code: Option<u16>, reason: String },
    HeartbeatExpired { generation: u64 },
    RetryDue { generation: u64 },
}

/// An open connection and everything that lives exactly as long as it.
struct Link {
    outbound: OutboundSender,
    heartbeat: HeartbeatMonitor,
    _reader: ScheduledTask,
}

impl Link {
    fn close(self, code: u16, reason: &str) {
        self.heartbeat.stop();
        let _ = self.outbound.unbounded_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Where the actor is. Timers and sockets are owned by the phase that needs
/// them, so leaving a phase cancels them.
enum Phase {
    Idle,
    Opening { generation: u64, _task: ScheduledTask },
    Open { generation: u64, link: Link },
    Backoff { generation: u64, _timer: ScheduledTask },
    Failed,
}

impl Phase {
    fn is_active(&self) -> bool {
        matches!(self, Phase::Opening { .. } | Phase::Open { .. })
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CloseCause {
    Socket { code: Option<u16>, reason: String },
    HeartbeatTimeout,
    OpenFailed(TransportError),
}

impl CloseCause {
    fn is_auth_rejection(&self) -> bool {
        match self {
            CloseCause::Socket { code, .. } => *code == Some(AUTH_REJECTED_CLOSE_CODE),
            CloseCause::OpenFailed(err) => err.is_auth(),
            CloseCause::HeartbeatTimeout => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            CloseCause::Socket { code: Some(code), reason } if !reason.is_empty() => {
                format!("closed with code {}: {}", code, reason)
            }
            CloseCause::Socket { code: Some(code), .. } => format!("closed with code {}", code),
            CloseCause::Socket { code: None, reason } if !reason.is_empty() => reason.clone(),
            CloseCause::Socket { code: None, .. } => "connection lost".to_string(),
            CloseCause::HeartbeatTimeout => srtmon_shared::HEARTBEAT_TIMEOUT_REASON.to_string(),
            CloseCause::OpenFailed(err) => err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CloseOutcome {
    Stop,
    Fail(SyncError),
    Retry { delay: Duration },
}

/// Decide what follows a close, given `attempts` consecutive failures so far.
pub(crate) fn next_step(
    policy: &ReconnectPolicy,
    attempts: u32,
    intentional: bool,
    cause: &CloseCause,
) -> CloseOutcome {
    if intentional {
        CloseOutcome::Stop
    } else if cause.is_auth_rejection() {
        CloseOutcome::Fail(SyncError::AuthenticationRejected {
            reason: cause.describe(),
        })
    } else if policy.allows(attempts) {
        CloseOutcome::Retry {
            delay: policy.delay_for_attempt(attempts),
        }
    } else {
        CloseOutcome::Fail(SyncError::ReconnectExhausted {
            attempts,
            last_error: cause.describe(),
        })
    }
}

/// Handle to the live feed connection.
///
/// All methods are non-blocking. The actor stops when [`shutdown`] is called
/// or the last handle is dropped.
///
/// [`shutdown`]: ConnectionManager::shutdown
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    channels: watch::Receiver<Arc<ChannelSnapshot>>,
    notices: broadcast::Sender<Notice>,
}

impl ConnectionManager {
    /// Start a manager that connects with tokio-tungstenite.
    pub fn spawn(config: &SyncConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self::spawn_with(config, tokens, Arc::new(WsConnector))
    }

    pub fn spawn_with(
        config: &SyncConfig,
        tokens: Arc<dyn TokenSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::default());
        let dispatcher = Dispatcher::new();
        let credentials = tokens.subscribe();

        let handle = Self {
            commands,
            state: state_rx,
            channels: dispatcher.subscribe_channels(),
            notices: dispatcher.notice_sender(),
        };

        let actor = Actor {
            config: config.clone(),
            tokens,
            connector,
            dispatcher,
            state,
            events,
            phase: Phase::Idle,
            generation: 0,
            attempts: 0,
            intentional_close: false,
        };
        tokio::spawn(actor.run(commands_rx, events_rx, credentials));

        handle
    }

    /// Open the connection. No-op while connecting or connected.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Send a message if connected; dropped otherwise.
    pub fn send(&self, envelope: MessageEnvelope) {
        let _ = self.commands.send(Command::Send(envelope));
    }

    /// Disconnect and stop the actor. Later calls on any handle do nothing.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The latest channel snapshot received from the server.
    pub fn channels(&self) -> Arc<ChannelSnapshot> {
        self.channels.borrow().clone()
    }

    pub fn subscribe_channels(&self) -> watch::Receiver<Arc<ChannelSnapshot>> {
        self.channels.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

struct Actor {
    config: SyncConfig,
    tokens: Arc<dyn TokenSource>,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<Event>,
    phase: Phase,
    generation: u64,
    /// Consecutive failed attempts since the last successful open.
    attempts: u32,
    /// Set by `disconnect()`, cleared by `connect()`.
    intentional_close: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut credentials: watch::Receiver<u64>,
    ) {
        let mut credentials_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.on_connect_requested(),
                    Some(Command::Disconnect) => self.disconnect(),
                    Some(Command::Send(envelope)) => self.send(&envelope),
                    Some(Command::Shutdown(ack)) => {
                        self.disconnect();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
                changed = credentials.changed(), if credentials_open => match changed {
                    Ok(()) => self.on_credentials_changed(),
                    Err(_) => credentials_open = false,
                },
            }
        }
        tracing::debug!("live feed manager stopped");
    }

    fn on_connect_requested(&mut self) {
        if matches!(self.phase, Phase::Failed) {
            self.attempts = 0;
        }
        self.intentional_close = false;
        self.connect();
    }

    fn connect(&mut self) {
        if self.phase.is_active() {
            tracing::debug!("connect ignored, live feed already active");
            return;
        }

        let Some(token) = self.tokens.token() else {
            self.fail(SyncError::AuthenticationRequired);
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let url = self.config.ws_endpoint(&token);
        tracing::info!(
            "connecting to {}{} (attempt {})",
            url.host_str().unwrap_or_default(),
            url.path(),
            self.attempts
        );

        let connector = self.connector.clone();
        let events = self.events.clone();
        let timeout = self.config.connect_timeout;
        let task = ScheduledTask::spawn(async move {
            let event = match tokio::time::timeout(timeout, connector.open(url)).await {
                Ok(Ok(transport)) => Event::Opened { generation, transport },
                Ok(Err(error)) => Event::OpenFailed { generation, error },
                Err(_) => Event::OpenFailed {
                    generation,
                    error: TransportError::Timeout(timeout),
                },
            };
            let _ = events.send(event);
        });

        self.phase = Phase::Opening {
            generation,
            _task: task,
        };
        self.set_state(ConnectionState::Connecting {
            attempt: self.attempts,
        });
    }

    fn disconnect(&mut self) {
        self.intentional_close = true;
        self.attempts = 0;
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Open { link, .. } => {
                tracing::info!("disconnecting live feed");
                link.close(NORMAL_CLOSE_CODE, CLIENT_DISCONNECT_REASON);
            }
            Phase::Opening { .. } => tracing::debug!("cancelled in-flight connect"),
            Phase::Backoff { .. } => tracing::debug!("cancelled pending reconnect"),
            Phase::Idle | Phase::Failed => {}
        }
        self.set_state(ConnectionState::Disconnected { retry_in: None });
    }

    fn send(&self, envelope: &MessageEnvelope) {
        let Phase::Open { link, .. } = &self.phase else {
            tracing::debug!(
                "dropping `{}`, live feed not connected",
                envelope.message_type().as_str()
            );
            return;
        };
        match envelope.encode() {
            Ok(json) => {
                let _ = link.outbound.unbounded_send(Outbound::Text(json));
            }
            Err(e) => tracing::error!("failed to encode `{}`: {}", envelope.message_type().as_str(), e),
        }
    }

    fn on_credentials_changed(&mut self) {
        if self.phase.is_active() {
            tracing::debug!("credential changed while connected, keeping current connection");
            return;
        }
        if self.tokens.token().is_none() {
            tracing::debug!("credential cleared");
            return;
        }
        // A fresh login re-arms the feed, even after an explicit disconnect.
        tracing::info!("credential changed, reconnecting");
        self.on_connect_requested();
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Opened { generation, transport } => {
                if self.is_opening(generation) {
                    self.on_open(generation, transport);
                } else {
                    tracing::debug!("discarding stale connection (generation {})", generation);
                }
            }
            Event::OpenFailed { generation, error } => {
                if self.is_opening(generation) {
                    tracing::warn!("live feed connect failed: {}", error);
                    self.on_close(CloseCause::OpenFailed(error));
                }
            }
            Event::Frame { generation, text } => {
                if let Phase::Open { generation: current, link } = &self.phase {
                    if *current == generation {
                        self.dispatcher.handle(&text, Some(&link.heartbeat));
                    }
                }
            }
            Event::Closed { generation, code, reason } => {
                if self.is_open(generation) {
                    tracing::info!("live feed closed (code {:?}, reason {:?})", code, reason);
                    self.on_close(CloseCause::Socket { code, reason });
                }
            }
            Event::HeartbeatExpired { generation } => {
                if self.is_open(generation) {
                    self.on_close(CloseCause::HeartbeatTimeout);
                }
            }
            Event::RetryDue { generation } => {
                if matches!(self.phase, Phase::Backoff { generation: g, .. } if g == generation) {
                    self.connect();
                }
            }
        }
    }

    fn is_opening(&self, generation: u64) -> bool {
        matches!(self.phase, Phase::Opening { generation: g, .. } if g == generation)
    }

    fn is_open(&self, generation: u64) -> bool {
        matches!(self.phase, Phase::Open { generation: g, .. } if g == generation)
    }

    fn on_open(&mut self, generation: u64, transport: Transport) {
        let Transport { outbound, inbound } = transport;

        let expired = self.events.clone();
        let heartbeat = HeartbeatMonitor::start(&self.config.heartbeat, outbound.clone(), move || {
            let _ = expired.send(Event::HeartbeatExpired { generation });
        });
        let reader = ScheduledTask::spawn(forward_inbound(inbound, self.events.clone(), generation));

        let link = Link {
            outbound,
            heartbeat,
            _reader: reader,
        };
        self.phase = Phase::Open { generation, link };
        self.attempts = 0;
        tracing::info!("live feed connected");

        self.send(&MessageEnvelope::GetChannels);
        self.set_state(ConnectionState::Connected);
    }

    fn on_close(&mut self, cause: CloseCause) {
        if let Phase::Open { link, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            link.heartbeat.stop();
        }

        match next_step(&self.config.reconnect, self.attempts, self.intentional_close, &cause) {
            CloseOutcome::Stop => self.set_state(ConnectionState::Disconnected { retry_in: None }),
            CloseOutcome::Fail(err) => self.fail(err),
            CloseOutcome::Retry { delay } => {
                let generation = self.generation;
                let events = self.events.clone();
                let timer = ScheduledTask::after(delay, async move {
                    let _ = events.send(Event::RetryDue { generation });
                });
                self.attempts += 1;
                tracing::info!(
                    "live feed down ({}), reconnecting in {}ms (attempt {})",
                    cause.describe(),
                    delay.as_millis(),
                    self.attempts
                );
                self.phase = Phase::Backoff {
                    generation,
                    _timer: timer,
                };
                self.set_state(ConnectionState::Disconnected {
                    retry_in: Some(delay),
                });
            }
        }
    }

    fn fail(&mut self, err: SyncError) {
        tracing::warn!("live feed failed: {}", err);
        self.phase = Phase::Failed;
        self.set_state(ConnectionState::Failed(err));
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!("connection state: {} -> {}", current, next);
            *current = next;
            true
        });
    }
}

async fn forward_inbound(
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::UnboundedSender<Event>,
    generation: u64,
) {
    while let Some(item) = inbound.recv().await {
        let event = match item {
            Inbound::Text(text) => Event::Frame { generation, text },
            Inbound::Closed { code, reason } => {
                let _ = events.send(Event::Closed { generation, code, reason });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(Event::Closed {
        generation,
        code: None,
        reason: String::new(),
    });
}
