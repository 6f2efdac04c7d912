//! Heuristic mapping of bitrate, jitter and delay to a 0-10 quality rating.
//!
//! Each metric maps to a continuous 1-10 sub-score. Sub-scores are blended
//! with [`ScoringWeights`] and the blend is scaled by a penalty factor made
//! of independent threshold bands on the raw metrics.

use serde::{Deserialize, Serialize};

/// Relative weight of each sub-score in the blended rating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub latency: f64,
    pub jitter: f64,
    pub bitrate: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: 0.3,
            jitter: 0.3,
            bitrate: 0.4,
        }
    }
}

impl ScoringWeights {
    /// Rate one flow. Inputs are bits per second and milliseconds.
    ///
    /// # Examples
    /// ```
    /// use callshark_core::ScoringWeights;
    ///
    /// let weights = ScoringWeights::default();
    /// assert_eq!(weights.quality(3_000_000.0, 20.0, 2.0), 10);
    /// assert_eq!(weights.quality(6_000.0, 50.0, 5.0), 1);
    /// ```
    pub fn quality(&self, bitrate_bps: f64, latency_ms: f64, jitter_ms: f64) -> u8 {
        let blended = latency_score(latency_ms) * self.latency
            + jitter_score(jitter_ms) * self.jitter
            + bitrate_score(bitrate_bps) * self.bitrate;
        let overall = blended * penalty_factor(bitrate_bps, latency_ms, jitter_ms);
        overall.round_ties_even().clamp(0.0, 10.0) as u8
    }
}

/// Rate one flow with the default weights.
pub fn calculate_quality(bitrate_bps: f64, latency_ms: f64, jitter_ms: f64) -> u8 {
    ScoringWeights::default().quality(bitrate_bps, latency_ms, jitter_ms)
}

pub fn latency_score(latency_ms: f64) -> f64 {
    if latency_ms <= 50.0 {
        10.0
    } else if latency_ms <= 100.0 {
        10.0 - (latency_ms - 50.0) / 50.0 * 2.0
    } else if latency_ms <= 150.0 {
        8.0 - (latency_ms - 100.0) / 50.0 * 2.0
    } else if latency_ms <= 200.0 {
        6.0 - (latency_ms - 150.0) / 50.0 * 2.0
    } else {
        1.0
    }
}

pub fn jitter_score(jitter_ms: f64) -> f64 {
    if jitter_ms <= 5.0 {
        10.0
    } else if jitter_ms <= 15.0 {
        10.0 - (jitter_ms - 5.0) / 10.0 * 2.0
    } else if jitter_ms <= 25.0 {
        8.0 - (jitter_ms - 15.0) / 10.0 * 2.0
    } else {
        3.0
    }
}

pub fn bitrate_score(bitrate_bps: f64) -> f64 {
    if bitrate_bps > 2_000_000.0 {
        10.0
    } else if bitrate_bps >= 1_500_000.0 {
        9.0 + (bitrate_bps - 1_500_000.0) / 500_000.0
    } else if bitrate_bps >= 1_000_000.0 {
        7.0 + (bitrate_bps - 1_000_000.0) / 500_000.0 * 1.5
    } else if bitrate_bps >= 500_000.0 {
        5.0 + (bitrate_bps - 500_000.0) / 500_000.0 * 2.0
    } else {
        (4.0 - (500_000.0 - bitrate_bps) / 500_000.0).max(1.0)
    }
}

/// Product of the bitrate, latency and jitter threshold bands.
pub fn penalty_factor(bitrate_bps: f64, latency_ms: f64, jitter_ms: f64) -> f64 {
    let bitrate = if bitrate_bps < 300_000.0 {
        0.2
    } else if bitrate_bps < 500_000.0 {
        0.5
    } else if bitrate_bps < 1_000_000.0 {
        0.7
    } else if bitrate_bps < 2_000_000.0 {
        0.9
    } else {
        1.0
    };
    let latency = if latency_ms > 200.0 {
        0.5
    } else if latency_ms > 100.0 {
        0.7
    } else if latency_ms > 50.0 {
        0.9
    } else {
        1.0
    };
    let jitter = if jitter_ms > 25.0 {
        0.5
    } else if jitter_ms > 20.0 {
        0.8
    } else if jitter_ms > 10.0 {
        0.9
    } else {
        1.0
    };
    bitrate * latency * jitter
}
