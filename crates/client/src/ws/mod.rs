//! WebSocket live feed for channel status.
//!
//! This module provides:
//! - A single managed connection with auto-reconnect and exponential backoff
//! - An application-level heartbeat that detects half-open sockets
//! - Routing of server frames to published, read-only snapshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               ConnectionManager (actor)             │
//! │   phase: Idle | Opening | Open | Backoff | Failed   │
//! └─────────────────────────────────────────────────────┘
//!          │                 │                 │
//!          ▼                 ▼                 ▼
//!   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//!   │ Connector  │   │  Heartbeat   │   │ Dispatcher │
//!   │ (socket)   │   │  Monitor     │   │            │
//!   └────────────┘   └──────────────┘   └────────────┘
//!                                              │
//!                                 ┌────────────┴────────────┐
//!                                 ▼                         ▼
//!                     ┌────────────────────────┐  ┌───────────────────┐
//!                     │ watch<ChannelSnapshot> │  │ broadcast<Notice> │
//!                     └────────────────────────┘  └───────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::spawn(&config, tokens);
//! manager.connect();
//!
//! let mut channels = manager.subscribe_channels();
//! while channels.changed().await.is_ok() {
//!     for name in channels.borrow_and_update().names() {
//!         println!("{name}");
//!     }
//! }
//! ```

mod connection;
mod dispatcher;
mod heartbeat;
mod manager;
mod transport;

pub use connection::{ConnectionState, ReconnectPolicy, SyncError};
pub use dispatcher::{Dispatched, Dispatcher, Notice};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use manager::ConnectionManager;
pub use transport::{Connector, Inbound, Outbound, OutboundSender, Transport, TransportError, WsConnector};
