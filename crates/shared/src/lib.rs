//! Shared types for the srtmon live feed: wire protocol, REST payloads, errors.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
