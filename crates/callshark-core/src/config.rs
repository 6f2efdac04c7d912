use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::ScoringWeights;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2);
pub const DEFAULT_DISCOVERY_PACKETS: u64 = 2000;
pub const DEFAULT_FAILOVER_FLOOR_BPS: f64 = 50_000.0;
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 16;

/// Tunables of a monitoring session.
///
/// # Examples
/// ```
/// use callshark_core::MonitorConfig;
///
/// let config = MonitorConfig::default();
/// assert_eq!(config.failover_floor_bytes(), 12_500.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Aggregation window length (wall clock).
    pub window: Duration,
    /// Classified packets examined before picking the call's streams.
    pub discovery_packets: u64,
    /// A tracked direction at or below this rate may be replaced.
    pub failover_floor_bps: f64,
    /// Window snapshots buffered between aggregator and scorer.
    pub snapshot_capacity: usize,
    pub weights: ScoringWeights,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            discovery_packets: DEFAULT_DISCOVERY_PACKETS,
            failover_floor_bps: DEFAULT_FAILOVER_FLOOR_BPS,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            weights: ScoringWeights::default(),
        }
    }
}

impl MonitorConfig {
    /// Byte volume per window that corresponds to the failover floor.
    pub fn failover_floor_bytes(&self) -> f64 {
        self.failover_floor_bps * self.window.as_secs_f64() / 8.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.discovery_packets == 0 {
            return Err(ConfigError::ZeroDiscoveryPackets);
        }
        if self.snapshot_capacity == 0 {
            return Err(ConfigError::ZeroSnapshotCapacity);
        }
        if !self.failover_floor_bps.is_finite() || self.failover_floor_bps < 0.0 {
            return Err(ConfigError::InvalidFloor(self.failover_floor_bps));
        }
        let weights = [
            ("latency", self.weights.latency),
            ("jitter", self.weights.jitter),
            ("bitrate", self.weights.bitrate),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window duration must be greater than zero")]
    ZeroWindow,
    #[error("discovery packet count must be greater than zero")]
    ZeroDiscoveryPackets,
    #[error("snapshot capacity must be greater than zero")]
    ZeroSnapshotCapacity,
    #[error("failover floor must be a non-negative rate, got {0}")]
    InvalidFloor(f64),
    #[error("{name} weight must be a non-negative number, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },
}
