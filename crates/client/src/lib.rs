//! srtmon client - real-time channel synchronization core
//!
//! This crate keeps a local view of an SRT relay's channels in sync with the
//! backend: a WebSocket live feed for channel status, plus periodic REST
//! polling for analytics and host figures.

pub mod api_client;
pub mod config;
pub mod credentials;
pub mod polling;
pub mod storage;
pub mod timer;
pub mod ws;

pub use api_client::{ApiClient, DashboardSource};
pub use config::SyncConfig;
pub use credentials::{SharedToken, StoredSession, TokenSource};
pub use polling::{DashboardView, PollingAggregator};
pub use storage::Storage;
pub use ws::{ConnectionManager, ConnectionState, Notice, SyncError};
