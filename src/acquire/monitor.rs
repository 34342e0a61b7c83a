//! Round timing and memory tracking for long acquisition runs.
//!
//! Long sessions against a live page tend to slow down as the page grows;
//! the rolling average makes that visible in the log before it gets bad.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Rounds included in the rolling average.
pub const ROLLING_WINDOW: usize = 10;

/// Rounds slower than this are flagged once the window has filled.
pub const SLOW_ROUND: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub rounds: usize,
    pub total_runtime_ms: u128,
    pub mean_round_ms: u128,
    pub min_round_ms: u128,
    pub max_round_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<usize>,
}

pub struct PerformanceMonitor {
    started: Instant,
    rounds: Vec<Duration>,
    peak_memory: Option<usize>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        let mut monitor = PerformanceMonitor {
            started: Instant::now(),
            rounds: Vec::new(),
            peak_memory: None,
        };
        monitor.sample_memory();
        monitor
    }

    /// Record a finished round and log it with the rolling average.
    /// Returns true when the round was flagged as slow.
    pub fn record_round(&mut self, round: usize, duration: Duration, rows: usize, written: usize) -> bool {
        self.rounds.push(duration);
        self.sample_memory();

        let average = self.rolling_average();
        info!(
            round,
            rows,
            written,
            secs = format_args!("{:.2}", duration.as_secs_f64()),
            avg_secs = format_args!("{:.2}", average.as_secs_f64()),
            "round finished"
        );

        let slow = duration > SLOW_ROUND && self.rounds.len() > ROLLING_WINDOW;
        if slow {
            warn!(
                round,
                secs = format_args!("{:.2}", duration.as_secs_f64()),
                avg_secs = format_args!("{:.2}", average.as_secs_f64()),
                "round is slow, page may be degrading"
            );
        }
        slow
    }

    /// Mean of the last `ROLLING_WINDOW` rounds.
    pub fn rolling_average(&self) -> Duration {
        let window = &self.rounds[self.rounds.len().saturating_sub(ROLLING_WINDOW)..];
        mean(window)
    }

    pub fn rounds(&self) -> usize {
        self.rounds.len()
    }

    fn sample_memory(&mut self) {
        if let Some(stats) = memory_stats::memory_stats() {
            self.peak_memory = Some(self.peak_memory.map_or(stats.physical_mem, |p| p.max(stats.physical_mem)));
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            rounds: self.rounds.len(),
            total_runtime_ms: self.started.elapsed().as_millis(),
            mean_round_ms: mean(&self.rounds).as_millis(),
            min_round_ms: self.rounds.iter().min().map_or(0, Duration::as_millis),
            max_round_ms: self.rounds.iter().max().map_or(0, Duration::as_millis),
            peak_memory_bytes: self.peak_memory,
        }
    }

    pub fn log_summary(&mut self) -> RunSummary {
        self.sample_memory();
        let summary = self.summary();

        info!(
            rounds = summary.rounds,
            runtime = %humantime::format_duration(Duration::from_secs(self.started.elapsed().as_secs())),
            mean_ms = summary.mean_round_ms,
            min_ms = summary.min_round_ms,
            max_ms = summary.max_round_ms,
            peak_memory = %summary.peak_memory_bytes.map_or_else(|| "unknown".to_string(), format_bytes),
            "acquisition summary"
        );

        summary
    }
}

fn mean(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    durations.iter().sum::<Duration>() / durations.len() as u32
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn rolling_average_uses_last_ten_rounds() {
        let mut monitor = PerformanceMonitor::new();
        for _ in 0..5 {
            monitor.record_round(1, secs(100), 0, 0);
        }
        for _ in 0..10 {
            monitor.record_round(1, secs(2), 0, 0);
        }

        assert_eq!(monitor.rolling_average(), secs(2));
        assert_eq!(monitor.rounds(), 15);
    }

    #[test]
    fn slow_round_flagged_only_after_window_fills() {
        let mut monitor = PerformanceMonitor::new();
        for round in 1..=10 {
            assert!(!monitor.record_round(round, secs(50), 0, 0));
        }
        assert!(monitor.record_round(11, secs(50), 0, 0));
        assert!(!monitor.record_round(12, secs(5), 0, 0));
    }

    #[test]
    fn summary_reports_min_mean_max() {
        let mut monitor = PerformanceMonitor::new();
        monitor.record_round(1, secs(1), 10, 10);
        monitor.record_round(2, secs(3), 10, 5);

        let summary = monitor.summary();
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.min_round_ms, 1000);
        assert_eq!(summary.mean_round_ms, 2000);
        assert_eq!(summary.max_round_ms, 3000);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = PerformanceMonitor::new().summary();
        assert_eq!(summary.rounds, 0);
        assert_eq!(summary.mean_round_ms, 0);
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
