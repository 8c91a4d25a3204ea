//! Batch scheduler.
//!
//! Splits a run into batches, executes up to `max_concurrent_batches` of them
//! at a time on a rayon pool, and shrinks the batch size when the resource
//! monitor reports memory pressure between chunks.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = BatchScheduler::new(monitor, pool, DisplayHandles::new());
//! let report = scheduler.process_batch(items, &options, None)?;
//! println!("{} ok, {} failed", report.results.len(), report.errors.len());
//! ```

use crate::core::batch::{Batch, BatchTiers};
use crate::core::error::{BatchError, ProcessingError};
use crate::core::handle::{DisplayHandle, DisplayHandles};
use crate::core::types::{ProcessedImage, ProcessingOptions, SourceItem};
use crate::execution::metrics::{PerformanceMetrics, PerformanceMonitor, RunMetrics};
use crate::execution::pool::{process_item, ExecutionPool};
use crate::execution::progress::{ProgressCallback, ProgressTracker};
use crate::resources::{CleanupId, ResourceMonitor};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default pause after a chunk that ended under memory pressure.
pub const DEFAULT_BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1000);

/// Where the scheduler is in its current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    /// Running with a reduced batch size after memory pressure.
    Degrading,
    Completed,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Degrading => "degrading",
            SchedulerState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A source item that failed, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    /// Position of the item in the caller's input.
    pub index: usize,
    pub file_name: String,
    pub error: ProcessingError,
}

/// Everything a run produced.
///
/// With more than one batch in flight, `results` and `errors` are not in
/// input order; call [`BatchReport::sort_by_input_order`] if that matters.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<ProcessedImage>,
    pub errors: Vec<ItemError>,
    /// Present when performance monitoring was enabled for the run.
    pub metrics: Option<PerformanceMetrics>,
    /// Size of every batch, in the order they were formed.
    pub batch_sizes: Vec<usize>,
    /// Whether memory pressure reduced the batch size.
    pub degraded: bool,
    /// Monitor callback that releases this run's display handles.
    pub cleanup: Option<CleanupId>,
}

#[derive(Serialize)]
struct ResultSummary<'a> {
    id: &'a str,
    index: usize,
    file_name: &'a str,
    output_file_name: String,
    original_size: usize,
    processed_size: usize,
    processing_ms: f64,
    operation: &'a str,
    format: &'a str,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct ReportSummary<'a> {
    results: Vec<ResultSummary<'a>>,
    errors: &'a [ItemError],
    metrics: &'a Option<PerformanceMetrics>,
    batch_sizes: &'a [usize],
    degraded: bool,
}

impl BatchReport {
    /// Order results and errors by their position in the input.
    pub fn sort_by_input_order(&mut self) {
        self.results.sort_by_key(|r| r.original_index);
        self.errors.sort_by_key(|e| e.index);
    }

    /// Whether any item failed.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of items the run was given.
    pub fn total(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    /// Release the display handle of every result.
    pub fn release_all(&self) -> usize {
        self.results.iter().filter(|r| r.release()).count()
    }

    /// JSON summary without the encoded bytes.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let summary = ReportSummary {
            results: self
                .results
                .iter()
                .map(|r| ResultSummary {
                    id: &r.id,
                    index: r.original_index,
                    file_name: r.source.name(),
                    output_file_name: r.output_file_name(),
                    original_size: r.original_size,
                    processed_size: r.processed_size,
                    processing_ms: r.processing_time.as_secs_f64() * 1000.0,
                    operation: &r.operation,
                    format: r.target_format.label(),
                    width: r.width,
                    height: r.height,
                })
                .collect(),
            errors: &self.errors,
            metrics: &self.metrics,
            batch_sizes: &self.batch_sizes,
            degraded: self.degraded,
        };
        serde_json::to_string_pretty(&summary)
    }
}

/// Shared, read-only state for one run.
struct RunContext<'a> {
    options: &'a ProcessingOptions,
    tracker: ProgressTracker,
    metrics: Option<Mutex<RunMetrics>>,
    started_ms: u128,
    operation: String,
}

#[derive(Default)]
struct BatchOutcome {
    results: Vec<ProcessedImage>,
    errors: Vec<ItemError>,
}

/// Runs batches of source items through the execution pool.
pub struct BatchScheduler {
    monitor: Arc<ResourceMonitor>,
    pool: Arc<dyn ExecutionPool>,
    handles: DisplayHandles,
    tiers: BatchTiers,
    backpressure_pause: Duration,
    state: Mutex<SchedulerState>,
}

impl BatchScheduler {
    /// Create a scheduler with default tiers and pause.
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        pool: Arc<dyn ExecutionPool>,
        handles: DisplayHandles,
    ) -> Self {
        Self {
            monitor,
            pool,
            handles,
            tiers: BatchTiers::default(),
            backpressure_pause: DEFAULT_BACKPRESSURE_PAUSE,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    /// Set the batch tiers.
    pub fn with_tiers(mut self, tiers: BatchTiers) -> Self {
        self.tiers = tiers;
        self
    }

    /// Set the pause taken after a chunk under memory pressure.
    pub fn with_backpressure_pause(mut self, pause: Duration) -> Self {
        self.backpressure_pause = pause;
        self
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Display handle table results are registered in.
    pub fn handles(&self) -> &DisplayHandles {
        &self.handles
    }

    fn set_state(&self, state: SchedulerState) {
        let mut current = self.state.lock();
        if *current != state {
            log::debug!("Scheduler state: {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Process every item with `options`.
    ///
    /// Per-item failures end up in [`BatchReport::errors`]; only invalid
    /// options or configuration fail the call itself.
    pub fn process_batch(
        &self,
        items: Vec<SourceItem>,
        options: &ProcessingOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchReport, BatchError> {
        options.validate()?;
        self.tiers.validate()?;

        if items.is_empty() {
            self.set_state(SchedulerState::Completed);
            return Ok(BatchReport::default());
        }

        let total = items.len();
        let config = self.tiers.select(total);
        self.set_state(SchedulerState::Running);
        log::info!(
            "Processing {} item(s): batch size {}, {} concurrent batch(es), {}",
            total,
            config.batch_size,
            config.max_concurrent_batches,
            options.describe()
        );

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_batches)
            .thread_name(|i| format!("pixelsmith-batch-{}", i))
            .build()
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;

        let run = RunContext {
            options,
            tracker: ProgressTracker::new(total).with_callback(if config.enable_progress_updates {
                on_progress
            } else {
                None
            }),
            metrics: config
                .enable_performance_monitoring
                .then(|| Mutex::new(PerformanceMonitor::start(total))),
            started_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            operation: options.describe(),
        };

        let mut pending: VecDeque<(usize, SourceItem)> = items.into_iter().enumerate().collect();
        let mut batch_size = config.batch_size;
        let mut next_batch = 0;
        let mut report = BatchReport::default();

        while !pending.is_empty() {
            let mut chunk = Vec::with_capacity(config.max_concurrent_batches);
            while chunk.len() < config.max_concurrent_batches {
                match Batch::take_from(&mut pending, batch_size, next_batch) {
                    Some(batch) => {
                        report.batch_sizes.push(batch.len());
                        next_batch += 1;
                        chunk.push(batch);
                    }
                    None => break,
                }
            }

            // Join point: every batch in the chunk settles before the next one.
            let outcomes: Vec<BatchOutcome> = threads.install(|| {
                chunk
                    .par_iter()
                    .map(|batch| self.run_batch(batch, &run))
                    .collect()
            });
            for outcome in outcomes {
                report.results.extend(outcome.results);
                report.errors.extend(outcome.errors);
            }

            if let (Some(metrics), Some(sample)) = (&run.metrics, self.monitor.sample()) {
                metrics.lock().record_memory(sample.used_bytes);
            }

            if pending.is_empty() {
                break;
            }

            if self.monitor.is_pressure_high() {
                let reduced = (batch_size / 2).max(1);
                log::warn!(
                    "High memory pressure, reducing batch size {} -> {} and pausing {:?}",
                    batch_size,
                    reduced,
                    self.backpressure_pause
                );
                batch_size = reduced;
                report.degraded = true;
                self.set_state(SchedulerState::Degrading);
                thread::sleep(self.backpressure_pause);
            } else {
                self.set_state(SchedulerState::Running);
            }
        }

        report.metrics = run.metrics.map(|m| m.into_inner().snapshot());
        report.cleanup = self.finish(&report);

        log::info!(
            "Batch run finished: {} succeeded, {} failed",
            report.results.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Items within a batch run one after another, in input order.
    fn run_batch(&self, batch: &Batch, run: &RunContext<'_>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, item) in &batch.entries {
            run.tracker.item_started(*index, item.name(), batch.index);

            match process_item(self.pool.as_ref(), item, run.options) {
                Ok(output) => {
                    if let Some(metrics) = &run.metrics {
                        metrics.lock().record_success(output.duration);
                    }
                    let bytes: Arc<[u8]> = output.bytes.into();
                    let format = run.options.target_format;
                    let display = self.handles.create(Arc::clone(&bytes), format.mime_type());

                    outcome.results.push(ProcessedImage {
                        id: ProcessedImage::make_id(item.name(), run.started_ms, *index),
                        original_index: *index,
                        source: item.clone(),
                        processed_size: bytes.len(),
                        bytes,
                        display,
                        original_size: item.size(),
                        processing_time: output.duration,
                        operation: run.operation.clone(),
                        target_format: format,
                        width: output.width,
                        height: output.height,
                    });
                }
                Err(error) => {
                    log::warn!("Failed to process '{}': {}", item.name(), error);
                    if let Some(metrics) = &run.metrics {
                        metrics.lock().record_error(format!("{}: {}", item.name(), error));
                    }
                    outcome.errors.push(ItemError {
                        index: *index,
                        file_name: item.name().to_string(),
                        error,
                    });
                }
            }
        }

        outcome
    }

    /// Hand the run's display handles to the monitor and ask for a reclaim.
    fn finish(&self, report: &BatchReport) -> Option<CleanupId> {
        let created: Vec<DisplayHandle> = report.results.iter().map(|r| r.display.clone()).collect();
        let cleanup = (!created.is_empty()).then(|| {
            let handles = self.handles.clone();
            self.monitor.register_cleanup(move || {
                let released = handles.release_all(created.iter());
                log::debug!("Released {} display handle(s)", released);
                Ok(())
            })
        });
        self.monitor.hint_reclaim();
        self.set_state(SchedulerState::Completed);
        cleanup
    }

    /// Release a finished run's display handles now and withdraw its
    /// monitor callback. Returns the number of handles released.
    pub fn release_report(&self, report: &BatchReport) -> usize {
        if let Some(id) = report.cleanup {
            self.monitor.unregister_cleanup(id);
        }
        report.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::BatchConfig;
    use crate::core::types::{Surface, TargetFormat};
    use crate::execution::pool::InlinePool;
    use crate::resources::{ManualProbe, UnavailableProbe};
    use crate::transform;
    use image::Rgba;
    use std::time::Instant;

    fn png(name: &str, width: u32, height: u32) -> SourceItem {
        let surface = Surface::from_pixel(width, height, Rgba([30, 90, 150, 255]));
        let bytes = transform::convert_format(&surface, TargetFormat::Png, 0.9).unwrap();
        SourceItem::new(name, "image/png", bytes)
    }

    fn scheduler(monitor: Arc<ResourceMonitor>) -> BatchScheduler {
        BatchScheduler::new(monitor, Arc::new(InlinePool::new()), DisplayHandles::new())
    }

    fn quiet_monitor() -> Arc<ResourceMonitor> {
        Arc::new(ResourceMonitor::new(Arc::new(UnavailableProbe)))
    }

    #[test]
    fn test_empty_input() {
        let scheduler = scheduler(quiet_monitor());
        let calls = Arc::new(Mutex::new(0));
        let sink = calls.clone();
        let callback: ProgressCallback = Arc::new(move |_| *sink.lock() += 1);

        let report = scheduler
            .process_batch(Vec::new(), &ProcessingOptions::default(), Some(callback))
            .unwrap();
        assert!(report.results.is_empty());
        assert!(report.errors.is_empty());
        assert_eq!(*calls.lock(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[test]
    fn test_invalid_options_fail_the_call() {
        let scheduler = scheduler(quiet_monitor());
        let result = scheduler.process_batch(
            vec![png("a.png", 4, 4)],
            &ProcessingOptions::new().with_quality(0.0),
            None,
        );
        assert!(matches!(result, Err(BatchError::InvalidOptions(_))));
    }

    #[test]
    fn test_partial_failure_accounting() {
        let scheduler = scheduler(quiet_monitor())
            .with_tiers(BatchTiers::uniform(BatchConfig::new(2, 2)));
        let items = vec![
            png("a.png", 8, 8),
            SourceItem::new("broken.jpg", "image/jpeg", vec![0xFF, 0xD8, 0x00]),
            png("b.png", 8, 8),
            SourceItem::new("empty.png", "image/png", Vec::new()),
            png("c.png", 8, 8),
        ];

        let mut report = scheduler
            .process_batch(items, &ProcessingOptions::new().with_format(TargetFormat::Png), None)
            .unwrap();
        report.sort_by_input_order();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.errors.len(), 2);
        assert!(report.is_partial());
        assert_eq!(report.errors[0].index, 1);
        assert_eq!(report.errors[1].file_name, "empty.png");
        let indices: Vec<usize> = report.results.iter().map(|r| r.original_index).collect();
        assert_eq!(indices, vec![0, 2, 4]);

        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.processed_images, 3);
        assert_eq!(metrics.failed_images, 2);
    }

    #[test]
    fn test_progress_is_one_based_and_complete() {
        let scheduler = scheduler(quiet_monitor());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().push(p));

        let items = vec![png("a.png", 4, 4), png("b.png", 4, 4), png("c.png", 4, 4)];
        scheduler
            .process_batch(items, &ProcessingOptions::default(), Some(callback))
            .unwrap();

        let seen = seen.lock();
        let currents: Vec<usize> = seen.iter().map(|p| p.current).collect();
        assert_eq!(currents, vec![1, 2, 3]);
        assert!(seen.iter().all(|p| p.total == 3));
        assert_eq!(seen[2].operation, "Processing batch 3...");
    }

    #[test]
    fn test_progress_can_be_disabled() {
        let tiers = BatchTiers::uniform(BatchConfig::default().with_progress_updates(false));
        let scheduler = scheduler(quiet_monitor()).with_tiers(tiers);
        let calls = Arc::new(Mutex::new(0));
        let sink = calls.clone();
        let callback: ProgressCallback = Arc::new(move |_| *sink.lock() += 1);

        scheduler
            .process_batch(vec![png("a.png", 4, 4)], &ProcessingOptions::default(), Some(callback))
            .unwrap();
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_pressure_shrinks_batches_and_pauses() {
        let probe = Arc::new(ManualProbe::with_sample(90, 100));
        let monitor = Arc::new(ResourceMonitor::new(probe.clone()));
        let scheduler = scheduler(monitor)
            .with_tiers(BatchTiers::uniform(BatchConfig::new(1, 4)));

        let items: Vec<SourceItem> = (0..7).map(|i| png(&format!("{}.png", i), 4, 4)).collect();
        let started = Instant::now();
        let report = scheduler
            .process_batch(items, &ProcessingOptions::default(), None)
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(report.degraded);
        assert_eq!(report.batch_sizes, vec![4, 2, 1]);
        assert_eq!(report.results.len(), 7);
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[test]
    fn test_no_pressure_keeps_batch_size() {
        let probe = Arc::new(ManualProbe::with_sample(10, 100));
        let monitor = Arc::new(ResourceMonitor::new(probe));
        let scheduler = scheduler(monitor)
            .with_tiers(BatchTiers::uniform(BatchConfig::new(1, 2)))
            .with_backpressure_pause(Duration::ZERO);

        let items: Vec<SourceItem> = (0..5).map(|i| png(&format!("{}.png", i), 4, 4)).collect();
        let report = scheduler
            .process_batch(items, &ProcessingOptions::default(), None)
            .unwrap();
        assert!(!report.degraded);
        assert_eq!(report.batch_sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_completion_registers_handle_release() {
        let monitor = quiet_monitor();
        let scheduler = scheduler(monitor.clone());
        let report = scheduler
            .process_batch(vec![png("a.png", 4, 4), png("b.png", 4, 4)], &ProcessingOptions::default(), None)
            .unwrap();

        assert_eq!(scheduler.handles().live_count(), 2);
        assert!(report.results.iter().all(|r| r.display.is_live()));

        monitor.force_cleanup();
        assert_eq!(scheduler.handles().live_count(), 0);
        assert!(report.results.iter().all(|r| !r.bytes.is_empty()));
    }

    #[test]
    fn test_release_report_withdraws_callback() {
        let monitor = quiet_monitor();
        let scheduler = scheduler(monitor.clone());
        let report = scheduler
            .process_batch(vec![png("a.png", 4, 4), png("b.png", 4, 4)], &ProcessingOptions::default(), None)
            .unwrap();
        assert!(report.cleanup.is_some());
        assert_eq!(monitor.pending_cleanups(), 1);

        assert_eq!(scheduler.release_report(&report), 2);
        assert_eq!(scheduler.handles().live_count(), 0);
        assert_eq!(monitor.pending_cleanups(), 0);
        assert_eq!(scheduler.release_report(&report), 0);
    }

    #[test]
    fn test_duplicate_names_get_distinct_ids() {
        let scheduler = scheduler(quiet_monitor());
        let report = scheduler
            .process_batch(vec![png("same.png", 4, 4), png("same.png", 4, 4)], &ProcessingOptions::default(), None)
            .unwrap();
        assert_ne!(report.results[0].id, report.results[1].id);
    }

    #[test]
    fn test_report_json_omits_bytes() {
        let scheduler = scheduler(quiet_monitor());
        let report = scheduler
            .process_batch(
                vec![png("a.png", 6, 6), SourceItem::new("x.png", "image/png", Vec::new())],
                &ProcessingOptions::new().with_format(TargetFormat::Png),
                None,
            )
            .unwrap();
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"][0]["output_file_name"], "a.png");
        assert_eq!(value["errors"][0]["error"]["kind"], "Decode");
    }
}
