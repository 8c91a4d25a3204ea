//! Per-run performance metrics.
//!
//! Purely observational: nothing in the scheduler reads these back to make
//! decisions.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_images: usize,
    pub processed_images: usize,
    pub failed_images: usize,
    /// Sum of successful item durations in milliseconds.
    pub total_processing_ms: f64,
    /// Mean successful item duration in milliseconds.
    pub average_processing_ms: f64,
    /// Last sampled process memory in bytes.
    pub memory_usage: u64,
    /// Error messages in the order they were recorded.
    pub errors: Vec<String>,
    /// Wall-clock time since the run started, in milliseconds.
    pub elapsed_ms: f64,
}

/// Entry point for metrics collection.
pub struct PerformanceMonitor;

impl PerformanceMonitor {
    /// Begin collecting metrics for a run of `total_images` items.
    pub fn start(total_images: usize) -> RunMetrics {
        RunMetrics {
            started: Instant::now(),
            metrics: PerformanceMetrics {
                total_images,
                ..PerformanceMetrics::default()
            },
        }
    }
}

/// Metrics for one run. Owned by the scheduler for the duration of the run.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    started: Instant,
    metrics: PerformanceMetrics,
}

impl RunMetrics {
    /// Record a successful item.
    pub fn record_success(&mut self, duration: Duration) {
        let m = &mut self.metrics;
        m.processed_images += 1;
        m.total_processing_ms += duration.as_secs_f64() * 1000.0;
        m.average_processing_ms = m.total_processing_ms / m.processed_images as f64;
    }

    /// Record a failed item.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.metrics.failed_images += 1;
        self.metrics.errors.push(message.into());
    }

    /// Record a memory reading.
    pub fn record_memory(&mut self, bytes: u64) {
        self.metrics.memory_usage = bytes;
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            elapsed_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            ..self.metrics.clone()
        }
    }

    /// Percentage of items that succeeded; 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.metrics.total_images == 0 {
            return 0.0;
        }
        self.metrics.processed_images as f64 / self.metrics.total_images as f64 * 100.0
    }

    /// Multi-line summary for humans.
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let lines = [
            "Processing Summary:".to_string(),
            format!("- Total Images: {}", m.total_images),
            format!(
                "- Successfully Processed: {} ({:.1}%)",
                m.processed_images,
                self.success_rate()
            ),
            format!("- Failed: {}", m.failed_images),
            format!("- Total Time: {:.2}s", self.started.elapsed().as_secs_f64()),
            format!(
                "- Average Processing Time: {:.0}ms per image",
                m.average_processing_ms
            ),
            format!(
                "- Memory Usage: {:.2}MB",
                m.memory_usage as f64 / 1024.0 / 1024.0
            ),
        ];
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut run = PerformanceMonitor::start(4);
        run.record_success(Duration::from_millis(100));
        run.record_success(Duration::from_millis(300));
        run.record_error("bad.jpg: truncated");
        run.record_memory(2 * 1024 * 1024);

        let snapshot = run.snapshot();
        assert_eq!(snapshot.processed_images, 2);
        assert_eq!(snapshot.failed_images, 1);
        assert!((snapshot.average_processing_ms - 200.0).abs() < 1e-6);
        assert_eq!(snapshot.errors, vec!["bad.jpg: truncated".to_string()]);
        assert_eq!(run.success_rate(), 50.0);
    }

    #[test]
    fn test_summary_does_not_mutate() {
        let mut run = PerformanceMonitor::start(2);
        run.record_success(Duration::from_millis(10));
        let before = run.snapshot();
        let summary = run.summary();
        assert!(summary.contains("Successfully Processed: 1 (50.0%)"));
        assert!(summary.contains("Memory Usage: 0.00MB"));
        assert_eq!(run.snapshot().processed_images, before.processed_images);
    }

    #[test]
    fn test_empty_run() {
        let run = PerformanceMonitor::start(0);
        assert_eq!(run.success_rate(), 0.0);
        assert_eq!(run.snapshot().average_processing_ms, 0.0);
    }
}
