use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::window::{Attribution, Failover, TrackedStreams, WindowSnapshot, WindowState};
use crate::line::parse_line;
use crate::source::{LineSource, SourceError};

/// Counters reported by the aggregator when it stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSummary {
    /// Tracked streams at the time the aggregator stopped.
    pub tracked: TrackedStreams,
    pub windows_closed: u64,
    pub snapshots_dropped: u64,
    pub packets_tracked: u64,
    pub packets_background: u64,
    pub lines_dropped: u64,
    pub failovers: Vec<Failover>,
}

impl AggregatorSummary {
    fn new(tracked: TrackedStreams) -> Self {
        Self {
            tracked,
            windows_closed: 0,
            snapshots_dropped: 0,
            packets_tracked: 0,
            packets_background: 0,
            lines_dropped: 0,
            failovers: Vec::new(),
        }
    }
}

/// Consumes capture lines, folds them into fixed wall-clock windows and
/// publishes one snapshot per window.
pub(crate) struct Aggregator<S> {
    source: S,
    state: WindowState,
    window: Duration,
    snapshots: mpsc::Sender<WindowSnapshot>,
    cancel: CancellationToken,
}

impl<S: LineSource> Aggregator<S> {
    pub(crate) fn new(
        source: S,
        state: WindowState,
        window: Duration,
        snapshots: mpsc::Sender<WindowSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            state,
            window,
            snapshots,
            cancel,
        }
    }

    /// Run until the source ends or the session is cancelled. A partially
    /// filled window is discarded on exit.
    pub(crate) async fn run(mut self) -> Result<AggregatorSummary, SourceError> {
        let mut summary = AggregatorSummary::new(self.state.tracked());
        let mut deadline = Instant::now() + self.window;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("aggregator cancelled");
                    break;
                }
                _ = sleep_until(deadline) => {
                    self.close_window(&mut summary);
                    deadline = Instant::now() + self.window;
                }
                line = self.source.next_line() => {
                    let Some(line) = line? else {
                        info!("packet source closed");
                        break;
                    };
                    self.handle_line(&line, &mut summary);
                }
            }
        }

        summary.tracked = self.state.tracked();
        Ok(summary)
    }

    fn handle_line(&mut self, line: &str, summary: &mut AggregatorSummary) {
        let record = match parse_line(line) {
            Ok(Some(record)) => record,
            Ok(None) => {
                summary.lines_dropped += 1;
                return;
            }
            Err(err) => {
                trace!(error = %err, line = %line, "dropping unparseable line");
                summary.lines_dropped += 1;
                return;
            }
        };
        match self.state.observe(&record) {
            Attribution::Tracked(_) => summary.packets_tracked += 1,
            Attribution::Background(_) => summary.packets_background += 1,
            Attribution::Ignored => {}
        }
    }

    fn close_window(&mut self, summary: &mut AggregatorSummary) {
        let closed = self.state.close();
        summary.windows_closed += 1;
        debug!(
            window = summary.windows_closed,
            flows = closed.snapshot.flows.len(),
            outgoing_bytes = closed.outgoing_bytes,
            incoming_bytes = closed.incoming_bytes,
            ready = closed.snapshot.ready,
            "window closed"
        );
        for failover in &closed.failovers {
            info!(
                direction = %failover.direction,
                from = %failover.from,
                to = %failover.to,
                "tracked stream too quiet, switching"
            );
        }
        summary.failovers.extend(closed.failovers);

        match self.snapshots.try_send(closed.snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(window = summary.windows_closed, "scorer is behind, dropping window snapshot");
                summary.snapshots_dropped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                debug!("scorer stopped, window snapshot discarded");
                summary.snapshots_dropped += 1;
            }
        }
    }
}
