//! Dashboard polling.
//!
//! Some figures (analytics, stream info, host load) are not pushed over the
//! live feed, so the dashboard polls them over REST on a fixed interval. Each
//! source fails independently: a failed fetch keeps the previous value,
//! marked stale, and the next tick is the only retry.

mod aggregator;
mod view;

pub use aggregator::PollingAggregator;
pub use view::{ChannelView, DashboardView, SourceHealth, SourceSlot, SourcesHealth, TickResults};
