//! Pipeline configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! ```toml
//! pool_size_cap = 2
//! pressure_threshold = 0.75
//! backpressure_pause_ms = 500
//!
//! [tiers.large]
//! max_concurrent_batches = 2
//! batch_size = 4
//! ```

use crate::core::batch::BatchTiers;
use crate::core::error::ConfigError;
use crate::execution::pool::MAX_POOL_SIZE;
use crate::execution::scheduler::DEFAULT_BACKPRESSURE_PAUSE;
use crate::resources::{DEFAULT_MONITOR_INTERVAL, DEFAULT_PRESSURE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on worker contexts (at most 4).
    pub pool_size_cap: usize,
    /// Used/limit memory ratio above which pressure is high.
    pub pressure_threshold: f64,
    /// Seconds between monitor timer ticks.
    pub monitor_interval_secs: u64,
    /// Pause after a chunk that ended under pressure, in milliseconds.
    pub backpressure_pause_ms: u64,
    /// Start the monitor timer thread with the pipeline.
    pub start_monitor: bool,
    /// Master switch for progress callbacks.
    pub enable_progress_updates: bool,
    /// Master switch for run metrics.
    pub enable_performance_monitoring: bool,
    /// Batch sizing by input count. Kept last: TOML tables follow plain keys.
    pub tiers: BatchTiers,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size_cap: MAX_POOL_SIZE,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL.as_secs(),
            backpressure_pause_ms: DEFAULT_BACKPRESSURE_PAUSE.as_millis() as u64,
            start_monitor: true,
            enable_progress_updates: true,
            enable_performance_monitoring: true,
            tiers: BatchTiers::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Set the worker context cap.
    pub fn with_pool_size_cap(mut self, cap: usize) -> Self {
        self.pool_size_cap = cap;
        self
    }

    /// Set the pressure threshold.
    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold;
        self
    }

    /// Set the monitor interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_secs = interval.as_secs();
        self
    }

    /// Set the backpressure pause.
    pub fn with_backpressure_pause(mut self, pause: Duration) -> Self {
        self.backpressure_pause_ms = pause.as_millis() as u64;
        self
    }

    /// Start or skip the monitor timer.
    pub fn with_monitor_timer(mut self, start: bool) -> Self {
        self.start_monitor = start;
        self
    }

    /// Set the batch tiers.
    pub fn with_tiers(mut self, tiers: BatchTiers) -> Self {
        self.tiers = tiers;
        self
    }

    /// Enable/disable progress updates.
    pub fn with_progress_updates(mut self, enabled: bool) -> Self {
        self.enable_progress_updates = enabled;
        self
    }

    /// Enable/disable run metrics.
    pub fn with_performance_monitoring(mut self, enabled: bool) -> Self {
        self.enable_performance_monitoring = enabled;
        self
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn backpressure_pause(&self) -> Duration {
        Duration::from_millis(self.backpressure_pause_ms)
    }

    /// Tiers with the master switches applied to every tier.
    pub fn effective_tiers(&self) -> BatchTiers {
        let mut tiers = self.tiers;
        for tier in [&mut tiers.tiny, &mut tiers.small, &mut tiers.large] {
            tier.enable_progress_updates &= self.enable_progress_updates;
            tier.enable_performance_monitoring &= self.enable_performance_monitoring;
        }
        tiers
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size_cap == 0 || self.pool_size_cap > MAX_POOL_SIZE {
            return Err(ConfigError::invalid(
                "pool_size_cap",
                format!("must be within 1..={}, got {}", MAX_POOL_SIZE, self.pool_size_cap),
            ));
        }
        if !(self.pressure_threshold > 0.0 && self.pressure_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "pressure_threshold",
                format!("must be within (0, 1], got {}", self.pressure_threshold),
            ));
        }
        if self.monitor_interval_secs == 0 {
            return Err(ConfigError::invalid("monitor_interval_secs", "must be at least 1"));
        }
        self.tiers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::BatchConfig;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size_cap, 4);
        assert_eq!(config.pressure_threshold, 0.6);
        assert_eq!(config.monitor_interval(), Duration::from_secs(10));
        assert_eq!(config.backpressure_pause(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            pool_size_cap = 2
            backpressure_pause_ms = 250

            [tiers.large]
            max_concurrent_batches = 3
            batch_size = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.pool_size_cap, 2);
        assert_eq!(config.backpressure_pause(), Duration::from_millis(250));
        assert_eq!(config.tiers.large.batch_size, 5);
        assert!(config.tiers.large.enable_progress_updates);
        assert_eq!(config.tiers.tiny, BatchConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(PipelineConfig::from_toml_str("pool_size_cap = 8").is_err());
        assert!(PipelineConfig::from_toml_str("pressure_threshold = 0.0").is_err());
        assert!(PipelineConfig::from_toml_str("[tiers.small]\nbatch_size = 0").is_err());
        assert!(matches!(
            PipelineConfig::from_toml_str("pool_size_cap = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_master_switches_override_tiers() {
        let config = PipelineConfig::new().with_progress_updates(false);
        let tiers = config.effective_tiers();
        assert!(!tiers.tiny.enable_progress_updates);
        assert!(!tiers.large.enable_progress_updates);
        assert!(tiers.large.enable_performance_monitoring);
    }

    #[test]
    fn test_from_file_round_trip() {
        let config = PipelineConfig::new()
            .with_pool_size_cap(3)
            .with_tiers(BatchTiers::uniform(BatchConfig::new(2, 3)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
