//! CallShark core library for live call-quality estimation.
//!
//! The pipeline reads capture descriptor lines from a [`LineSource`], picks
//! the call's dominant outgoing and incoming conversations, aggregates their
//! packets over fixed wall-clock windows and rates each sub-flow on a 0-10
//! scale. Line decoding is pure and side-effect free; I/O stays in `source`
//! implementations and the two long-running loops live in tokio tasks
//! connected by a bounded channel.
//!
//! Invariants:
//! - Exactly one outgoing and one incoming stream are tracked at a time.
//! - Discovery and failover break ties by first-seen order.
//! - Both loops observe the session's cancellation token every iteration.
//!
//! # Examples
//! ```
//! use callshark_core::{calculate_quality, parse_packet};
//!
//! let record = parse_packet("0.5 3 10.0.0.5 -> 52.1.2.3 UDP 1242 50000 -> 3478").unwrap();
//! assert_eq!(record.size, 1242);
//! assert_eq!(calculate_quality(2_500_000.0, 20.0, 2.0), 10);
//! ```

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

mod analysis;
mod config;
mod flow;
mod line;
mod monitor;
mod quality;
mod source;

pub use analysis::{
    AggregatorSummary, DiscoveredStreams, Failover, TrackedStreams, WindowAccumulation,
    WindowSnapshot, discover_streams,
};
pub use config::{ConfigError, MonitorConfig};
pub use flow::{AddrPair, Direction, FlowKey, LocalAddrs};
pub use line::{LineError, PacketRecord, parse_line, parse_packet};
pub use monitor::{Monitor, MonitorError, SessionOutcome, SessionSummary};
pub use quality::{
    FlowMetrics, FlowScore, QualityHistory, Scoreboard, ScoringWeights, calculate_quality,
    metrics, score,
};
pub use source::{ChannelSource, LineSource, ReaderSource, SourceError};

/// Current session report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Timestamp used when the clock cannot be formatted.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// End-of-session report: discovery result, aggregation counters and the
/// full quality history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    /// RFC3339 timestamp of report creation.
    pub generated_at: String,
    /// Whether discovery found both call directions.
    pub call_found: bool,
    pub discovery: DiscoveredStreams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregatorSummary>,
    pub windows_scored: u64,
    /// Mean of every recorded quality sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scoreboard: Option<Scoreboard>,
    pub history: QualityHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

/// Build the report for a finished session.
///
/// # Examples
/// ```
/// use callshark_core::{DiscoveredStreams, SessionOutcome, make_session_report};
///
/// let report = make_session_report(&SessionOutcome::NoCall(DiscoveredStreams::default()));
/// assert!(!report.call_found);
/// assert!(report.history.is_empty());
/// ```
pub fn make_session_report(outcome: &SessionOutcome) -> SessionReport {
    let mut report = SessionReport {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "callshark".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: now_rfc3339(),
        call_found: false,
        discovery: DiscoveredStreams::default(),
        aggregation: None,
        windows_scored: 0,
        mean_quality: None,
        last_scoreboard: None,
        history: QualityHistory::default(),
    };

    match outcome {
        SessionOutcome::NoCall(discovered) => {
            report.discovery = discovered.clone();
        }
        SessionOutcome::Completed(summary) => {
            report.call_found = true;
            report.discovery = summary.discovered.clone();
            report.aggregation = Some(summary.aggregation.clone());
            report.windows_scored = summary.windows_scored;
            report.mean_quality = summary.history.mean_quality();
            if summary.windows_scored > 0 {
                report.last_scoreboard = Some(summary.last_scoreboard.clone());
            }
            report.history = summary.history.clone();
        }
    }
    report
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| DEFAULT_GENERATED_AT.to_string())
}
