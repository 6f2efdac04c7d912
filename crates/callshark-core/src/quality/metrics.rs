//! Raw per-window network metrics derived from arrival times.

/// Bits per second for `total_bytes` spread over a window of `window_secs`.
pub fn bitrate_bps(total_bytes: u64, window_secs: f64) -> f64 {
    (total_bytes as f64 * 8.0) / window_secs
}

fn inter_arrival(arrival_times: &[f64]) -> impl Iterator<Item = f64> + '_ {
    arrival_times.windows(2).map(|pair| pair[1] - pair[0])
}

/// Population standard deviation of consecutive inter-arrival gaps, in ms.
/// Zero with fewer than two arrivals.
pub fn jitter_ms(arrival_times: &[f64]) -> f64 {
    if arrival_times.len() < 2 {
        return 0.0;
    }
    let gaps: Vec<f64> = inter_arrival(arrival_times).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|gap| (gap - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    variance.sqrt() * 1000.0
}

/// Largest inter-arrival gap, in ms. This is a worst-case delay spike, not
/// an end-to-end latency. Zero with fewer than two arrivals.
pub fn latency_ms(arrival_times: &[f64]) -> f64 {
    if arrival_times.len() < 2 {
        return 0.0;
    }
    inter_arrival(arrival_times).fold(f64::NEG_INFINITY, f64::max) * 1000.0
}
