//! Batch partitioning for multi-image runs.
//!
//! This module provides the batch sizing configuration, the item-count tiers
//! that pick a configuration for a run, and the [`Batch`] unit the scheduler
//! hands to its threads.

use crate::core::error::ConfigError;
use crate::core::types::SourceItem;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Sizing and reporting knobs for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Batches allowed in flight at once.
    pub max_concurrent_batches: usize,
    /// Items per batch before any pressure-driven shrinking.
    pub batch_size: usize,
    /// Send per-item progress to the caller's callback.
    pub enable_progress_updates: bool,
    /// Collect run metrics.
    pub enable_performance_monitoring: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 1,
            batch_size: 1,
            enable_progress_updates: true,
            enable_performance_monitoring: true,
        }
    }
}

impl BatchConfig {
    /// Create a config with the given sizing and default reporting flags.
    pub fn new(max_concurrent_batches: usize, batch_size: usize) -> Self {
        Self {
            max_concurrent_batches,
            batch_size,
            ..Self::default()
        }
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

    /// Check that both sizes are at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_batches",
                "must be at least 1",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Batch configurations keyed by input size.
///
/// The defaults serialize everything (one item per batch, one batch at a
/// time) because inputs can be arbitrarily large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchTiers {
    /// Upper bound (inclusive) of the tiny tier.
    pub tiny_max: usize,
    /// Upper bound (inclusive) of the small tier.
    pub small_max: usize,
    /// Used for runs of at most `tiny_max` items.
    pub tiny: BatchConfig,
    /// Used for runs of at most `small_max` items.
    pub small: BatchConfig,
    /// Used for everything larger.
    pub large: BatchConfig,
}

impl Default for BatchTiers {
    fn default() -> Self {
        Self {
            tiny_max: 2,
            small_max: 5,
            tiny: BatchConfig::default(),
            small: BatchConfig::default(),
            large: BatchConfig::default(),
        }
    }
}

impl BatchTiers {
    /// Pick the configuration for a run of `item_count` items.
    pub fn select(&self, item_count: usize) -> BatchConfig {
        if item_count <= self.tiny_max {
            self.tiny
        } else if item_count <= self.small_max {
            self.small
        } else {
            self.large
        }
    }

    /// Use the same configuration for every tier.
    pub fn uniform(config: BatchConfig) -> Self {
        Self {
            tiny: config,
            small: config,
            large: config,
            ..Self::default()
        }
    }

    /// Validate every tier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tiny_max > self.small_max {
            return Err(ConfigError::invalid(
                "tiers",
                format!(
                    "tiny_max ({}) must not exceed small_max ({})",
                    self.tiny_max, self.small_max
                ),
            ));
        }
        self.tiny.validate()?;
        self.small.validate()?;
        self.large.validate()
    }
}

/// A contiguous run of input items processed as one scheduling unit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Zero-based batch number within the run.
    pub index: usize,
    /// Items paired with their position in the caller's input.
    pub entries: Vec<(usize, SourceItem)>,
}

impl Batch {
    /// Pop up to `size` items off the front of the queue as a batch.
    ///
    /// Returns `None` once the queue is empty.
    pub fn take_from(
        queue: &mut VecDeque<(usize, SourceItem)>,
        size: usize,
        index: usize,
    ) -> Option<Batch> {
        if queue.is_empty() {
            return None;
        }
        let count = size.max(1).min(queue.len());
        Some(Batch {
            index,
            entries: queue.drain(..count).collect(),
        })
    }

    /// Get the number of items in this batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Number of batches needed for `item_count` items at `batch_size`.
pub fn batch_count(item_count: usize, batch_size: usize) -> usize {
    let size = batch_size.max(1);
    (item_count + size - 1) / size
}
