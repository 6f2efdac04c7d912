//! Stream discovery and windowed aggregation.
//!
//! Discovery runs once over the start of the capture to pick the call's
//! outgoing and incoming conversations. The aggregator then owns those
//! identities for the rest of the session, switching them when a tracked
//! direction goes quiet.

mod aggregator;
mod discovery;
mod tally;
mod window;

pub use aggregator::AggregatorSummary;
pub use discovery::{DiscoveredStreams, discover_streams};
pub use window::{Failover, TrackedStreams, WindowAccumulation, WindowSnapshot};

pub(crate) use aggregator::Aggregator;
pub(crate) use window::WindowState;
