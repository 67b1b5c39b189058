//! Per-stream counters and rolling latency window.

use std::collections::VecDeque;

/// Nearest-rank percentile over ascending samples: the value at
/// `floor(q * (n - 1))`, or 0 when there are no samples.
pub fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (q * (sorted.len() - 1) as f64).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Cumulative counters plus the most recent delivery latencies.
#[derive(Debug)]
pub struct StatsAggregator {
    pub rate_in: u64,
    pub rate_out: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    pub last_ts: Option<String>,
    latencies: VecDeque<u64>,
    window: usize,
}

impl StatsAggregator {
    pub fn new(window: usize) -> Self {
        Self {
            rate_in: 0,
            rate_out: 0,
            redelivered: 0,
            dead_lettered: 0,
            last_ts: None,
            latencies: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    pub fn record_accept(&mut self, ts: &str) {
        self.rate_in += 1;
        self.last_ts = Some(ts.to_string());
    }

    pub fn record_delivery(&mut self, latency_ms: u64) {
        self.rate_out += 1;
        self.latencies.push_back(latency_ms);
        while self.latencies.len() > self.window {
            self.latencies.pop_front();
        }
    }

    /// `(p50, p95)` over the current window.
    pub fn latency_percentiles(&self) -> (u64, u64) {
        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        (percentile(&sorted, 0.5), percentile(&sorted, 0.95))
    }

    pub fn sample_count(&self) -> usize {
        self.latencies.len()
    }
}
