use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, mpsc::error::TryRecvError, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::metrics::{bitrate_bps, jitter_ms, latency_ms};
use super::score::ScoringWeights;
use crate::analysis::{WindowAccumulation, WindowSnapshot};
use crate::flow::FlowKey;

/// Metrics and rating of one flow over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub bitrate_bps: f64,
    pub jitter_ms: f64,
    pub latency_ms: f64,
    pub quality: u8,
}

impl FlowMetrics {
    pub fn measure(acc: &WindowAccumulation, window_secs: f64, weights: &ScoringWeights) -> Self {
        let bitrate_bps = bitrate_bps(acc.total_bytes, window_secs);
        let jitter_ms = jitter_ms(&acc.arrival_times);
        let latency_ms = latency_ms(&acc.arrival_times);
        Self {
            bitrate_bps,
            jitter_ms,
            latency_ms,
            quality: weights.quality(bitrate_bps, latency_ms, jitter_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowScore {
    pub flow: FlowKey,
    #[serde(flatten)]
    pub metrics: FlowMetrics,
}

/// Latest per-flow results, replaced every time a window is scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scoreboard {
    /// Number of scored windows so far; 0 before the first result.
    pub sequence: u64,
    /// Flows in key order.
    pub flows: Vec<FlowScore>,
}

impl Scoreboard {
    pub fn get(&self, flow: &FlowKey) -> Option<&FlowMetrics> {
        self.flows
            .iter()
            .find(|score| score.flow == *flow)
            .map(|score| &score.metrics)
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// Every value computed during the session, one sample per flow per scored
/// window, as four parallel sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityHistory {
    pub bitrate: Vec<f64>,
    pub jitter: Vec<f64>,
    pub latency: Vec<f64>,
    pub quality: Vec<u8>,
}

impl QualityHistory {
    pub fn push(&mut self, metrics: &FlowMetrics) {
        self.bitrate.push(metrics.bitrate_bps);
        self.jitter.push(metrics.jitter_ms);
        self.latency.push(metrics.latency_ms);
        self.quality.push(metrics.quality);
    }

    pub fn len(&self) -> usize {
        self.quality.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quality.is_empty()
    }

    /// Mean rating over the session, if anything was scored.
    pub fn mean_quality(&self) -> Option<f64> {
        if self.quality.is_empty() {
            return None;
        }
        let sum: u64 = self.quality.iter().map(|q| *q as u64).sum();
        Some(sum as f64 / self.quality.len() as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ScorerOutput {
    pub windows_scored: u64,
    pub last: Scoreboard,
    pub history: QualityHistory,
}

/// Periodically drains window snapshots and turns them into ratings.
pub(crate) struct Scorer {
    snapshots: mpsc::Receiver<WindowSnapshot>,
    results: watch::Sender<Scoreboard>,
    window: Duration,
    weights: ScoringWeights,
    cancel: CancellationToken,
    pending: BTreeMap<FlowKey, WindowAccumulation>,
    output: ScorerOutput,
}

impl Scorer {
    pub(crate) fn new(
        snapshots: mpsc::Receiver<WindowSnapshot>,
        results: watch::Sender<Scoreboard>,
        window: Duration,
        weights: ScoringWeights,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            snapshots,
            results,
            window,
            weights,
            cancel,
            pending: BTreeMap::new(),
            output: ScorerOutput::default(),
        }
    }

    /// Wake once per window until cancelled, or until the aggregator has
    /// gone away and nothing is left to drain.
    pub(crate) async fn run(mut self) -> ScorerOutput {
        let mut ticker = interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("scorer cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let (ready, open) = self.drain();
                    if ready {
                        self.score_pending();
                    }
                    if !open {
                        debug!("aggregator finished, scorer stopping");
                        break;
                    }
                }
            }
        }

        self.output
    }

    /// Move queued snapshots into the pending map. Returns whether any of
    /// them was ready and whether the channel is still open.
    fn drain(&mut self) -> (bool, bool) {
        let mut ready = false;
        loop {
            match self.snapshots.try_recv() {
                Ok(snapshot) => {
                    ready |= snapshot.ready;
                    self.pending.extend(snapshot.flows);
                }
                Err(TryRecvError::Empty) => return (ready, true),
                Err(TryRecvError::Disconnected) => return (ready, false),
            }
        }
    }

    fn score_pending(&mut self) {
        let window_secs = self.window.as_secs_f64();
        let pending = std::mem::take(&mut self.pending);
        let flows: Vec<FlowScore> = pending
            .into_iter()
            .filter(|(_, acc)| acc.packet_count > 0)
            .map(|(flow, acc)| FlowScore {
                flow,
                metrics: FlowMetrics::measure(&acc, window_secs, &self.weights),
            })
            .collect();

        for score in &flows {
            self.output.history.push(&score.metrics);
            info!(
                flow = %score.flow,
                bitrate_bps = score.metrics.bitrate_bps,
                jitter_ms = score.metrics.jitter_ms,
                latency_ms = score.metrics.latency_ms,
                quality = score.metrics.quality,
                "flow scored"
            );
        }

        self.output.windows_scored += 1;
        let board = Scoreboard {
            sequence: self.output.windows_scored,
            flows,
        };
        self.output.last = board.clone();
        self.results.send_replace(board);
    }
}
