use std::collections::VecDeque;
use std::time::Duration;

use tracing::info;

/// Timing measurements for a single tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickTiming {
    pub capture_us: f64,
    pub evaluate_us: f64,
    pub emit_us: f64,
    pub total_us: f64,
}

impl TickTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_ms(&self) -> f64 {
        self.total_us / 1000.0
    }
}

pub fn micros(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000_000.0
}

/// Summary of one stage over the collected ticks, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Statistics collector for tick latency
///
/// Keeps the most recent `capacity` ticks so a long session does not grow
/// without bound.
pub struct LatencyStats {
    timings: VecDeque<TickTiming>,
    capacity: usize,
}

impl LatencyStats {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            timings: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn add(&mut self, timing: TickTiming) {
        if self.timings.len() == self.capacity {
            self.timings.pop_front();
        }
        self.timings.push_back(timing);
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// Nearest-rank percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx]
    }

    /// Calculate statistics for a specific stage
    pub fn stage_stats(&self, extract: impl Fn(&TickTiming) -> f64) -> StageStats {
        if self.timings.is_empty() {
            return StageStats::default();
        }

        let mut values: Vec<f64> = self.timings.iter().map(&extract).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        StageStats {
            mean: values.iter().sum::<f64>() / values.len() as f64,
            p50: Self::percentile(&values, 50.0),
            p95: Self::percentile(&values, 95.0),
            p99: Self::percentile(&values, 99.0),
        }
    }

    /// Log a latency report for the session
    pub fn log_report(&self, tick_ms: u64) {
        if self.timings.is_empty() {
            info!("No timing data collected");
            return;
        }

        info!("Tick latency over {} ticks (µs):", self.timings.len());
        Self::log_row("capture", self.stage_stats(|t| t.capture_us));
        Self::log_row("evaluate", self.stage_stats(|t| t.evaluate_us));
        Self::log_row("emit", self.stage_stats(|t| t.emit_us));
        let total = self.stage_stats(|t| t.total_us);
        Self::log_row("total", total);

        let budget_us = tick_ms as f64 * 1000.0;
        if total.p95 < budget_us {
            info!("  p95 within the {} ms tick budget", tick_ms);
        } else {
            info!(
                "  p95 {:.2} ms exceeds the {} ms tick budget",
                total.p95 / 1000.0,
                tick_ms
            );
        }
    }

    fn log_row(name: &str, stats: StageStats) {
        info!(
            "  {:<9} mean {:>8.0}  p50 {:>8.0}  p95 {:>8.0}  p99 {:>8.0}",
            name, stats.mean, stats.p50, stats.p95, stats.p99
        );
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn total(us: f64) -> TickTiming {
        TickTiming {
            total_us: us,
            ..TickTiming::default()
        }
    }

    #[test]
    fn test_tick_timing_total_ms() {
        let timing = total(50_000.0);
        assert_relative_eq!(timing.total_ms(), 50.0);
    }

    #[test]
    fn test_latency_stats_empty() {
        let stats = LatencyStats::new();
        assert!(stats.is_empty());
        assert_eq!(stats.stage_stats(|t| t.total_us), StageStats::default());
    }

    #[test]
    fn test_percentiles() {
        let mut stats = LatencyStats::new();
        for us in 1..=100 {
            stats.add(total(us as f64));
        }
        let s = stats.stage_stats(|t| t.total_us);
        assert_relative_eq!(s.mean, 50.5);
        assert_relative_eq!(s.p50, 51.0);
        assert_relative_eq!(s.p95, 95.0);
        assert_relative_eq!(s.p99, 99.0);
    }

    #[test]
    fn test_capacity_keeps_recent() {
        let mut stats = LatencyStats::with_capacity(3);
        for us in [1.0, 2.0, 3.0, 4.0] {
            stats.add(total(us));
        }
        assert_eq!(stats.len(), 3);
        assert_relative_eq!(stats.stage_stats(|t| t.total_us).mean, 3.0);
    }

    #[test]
    fn test_micros() {
        assert_relative_eq!(micros(Duration::from_millis(2)), 2000.0);
    }
}
