//! Session orchestration: discovery, then aggregator and scorer tasks.

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{
    Aggregator, AggregatorSummary, DiscoveredStreams, TrackedStreams, WindowState,
    discover_streams,
};
use crate::config::{ConfigError, MonitorConfig};
use crate::flow::LocalAddrs;
use crate::quality::{QualityHistory, Scoreboard, Scorer};
use crate::source::{LineSource, SourceError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Discovery found no candidate for at least one direction; nothing was
    /// monitored.
    NoCall(DiscoveredStreams),
    /// The call was monitored until the source ended or the session was
    /// cancelled.
    Completed(SessionSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub discovered: DiscoveredStreams,
    pub aggregation: AggregatorSummary,
    pub windows_scored: u64,
    pub last_scoreboard: Scoreboard,
    pub history: QualityHistory,
}

/// One monitoring session over one line source.
///
/// # Examples
/// ```no_run
/// use callshark_core::{LocalAddrs, Monitor, MonitorConfig, ReaderSource, SessionOutcome};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let local = LocalAddrs::new(["192.168.1.20".parse()?]);
/// let monitor = Monitor::new(MonitorConfig::default(), local)?;
/// let mut results = monitor.subscribe();
/// tokio::spawn(async move {
///     while results.changed().await.is_ok() {
///         println!("{:?}", *results.borrow());
///     }
/// });
///
/// let source = ReaderSource::new(tokio::io::BufReader::new(tokio::io::stdin()));
/// if let SessionOutcome::Completed(summary) = monitor.run(source, CancellationToken::new()).await? {
///     println!("{} samples", summary.history.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Monitor {
    config: MonitorConfig,
    local: LocalAddrs,
    results: watch::Sender<Scoreboard>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, local: LocalAddrs) -> Result<Self, MonitorError> {
        config.validate()?;
        let (results, _) = watch::channel(Scoreboard::default());
        Ok(Self {
            config,
            local,
            results,
        })
    }

    /// Receiver of the latest scoreboard, updated after every scored window.
    pub fn subscribe(&self) -> watch::Receiver<Scoreboard> {
        self.results.subscribe()
    }

    /// Discover the call's streams, then aggregate and score until the
    /// source ends or `cancel` fires.
    pub async fn run<S>(
        self,
        mut source: S,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, MonitorError>
    where
        S: LineSource + Send + 'static,
    {
        if self.local.is_empty() {
            warn!("no local addresses configured, every packet will look foreign");
        }

        let discovered = discover_streams(
            &mut source,
            &self.local,
            self.config.discovery_packets,
            &cancel,
        )
        .await?;
        let (Some(outgoing), Some(incoming)) = (discovered.outgoing, discovered.incoming) else {
            info!("no call streams found");
            return Ok(SessionOutcome::NoCall(discovered));
        };
        let tracked = TrackedStreams { outgoing, incoming };
        info!(outgoing = %tracked.outgoing, incoming = %tracked.incoming, "tracking call streams");

        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.snapshot_capacity);
        let state = WindowState::new(tracked, self.local, self.config.failover_floor_bytes());
        let aggregator = Aggregator::new(
            source,
            state,
            self.config.window,
            snapshot_tx,
            cancel.clone(),
        );
        let scorer = Scorer::new(
            snapshot_rx,
            self.results,
            self.config.window,
            self.config.weights,
            cancel,
        );

        let aggregator = tokio::spawn(aggregator.run());
        let scorer = tokio::spawn(scorer.run());
        let (aggregation, scored) = tokio::join!(aggregator, scorer);
        let aggregation = aggregation??;
        let scored = scored?;

        info!(
            windows = aggregation.windows_closed,
            scored = scored.windows_scored,
            failovers = aggregation.failovers.len(),
            "session finished"
        );
        Ok(SessionOutcome::Completed(SessionSummary {
            discovered,
            aggregation,
            windows_scored: scored.windows_scored,
            last_scoreboard: scored.last,
            history: scored.history,
        }))
    }
}
