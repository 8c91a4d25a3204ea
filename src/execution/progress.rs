//! Progress reporting for batch runs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A progress event, sent when an item starts processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based position of the item in the caller's input.
    pub current: usize,
    /// Number of items in the run.
    pub total: usize,
    /// Name of the item being processed.
    pub current_file: String,
    /// Human-readable stage, e.g. `Processing batch 2...`.
    pub operation: String,
}

impl Progress {
    /// Completion estimate in percent, counting the current item as done.
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        (self.current as f32 / self.total as f32) * 100.0
    }
}

/// Callback type for progress updates.
///
/// Called from batch threads, possibly concurrently.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Forwards per-item progress to an optional callback.
pub struct ProgressTracker {
    /// Total number of items in the run.
    total: usize,
    /// Number of items started so far.
    started: AtomicU64,
    /// Progress callback.
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a tracker that reports nowhere.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Report that the item at `global_index` (0-based) has started.
    pub fn item_started(&self, global_index: usize, file_name: &str, batch_index: usize) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.send_update(Progress {
            current: global_index + 1,
            total: self.total,
            current_file: file_name.to_string(),
            operation: format!("Processing batch {}...", batch_index + 1),
        });
    }

    /// Number of items reported so far.
    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::Relaxed) as usize
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn send_update(&self, update: Progress) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}
