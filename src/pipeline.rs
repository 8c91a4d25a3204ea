//! High-level entry point tying the monitor, worker pool and scheduler together.

use crate::config::PipelineConfig;
use crate::core::error::{BatchError, ConfigError, PixelsmithResult};
use crate::core::handle::{DisplayHandle, DisplayHandles};
use crate::core::types::{ProcessingOptions, SourceItem};
use crate::execution::pool::{ExecutionPool, WorkerPool};
use crate::execution::progress::ProgressCallback;
use crate::execution::scheduler::{BatchReport, BatchScheduler};
use crate::resources::{CleanupId, MemoryInfo, ResourceMonitor};
use parking_lot::Mutex;
use std::sync::Arc;

/// Batch image pipeline.
///
/// Owns a lazily created worker pool. The pool is rebuilt on the next run
/// after it has been terminated, whether by [`Pipeline::terminate_pool`], a
/// monitor cleanup pass, or a dispatch failure.
///
/// Display handles of a run stay live until the next run starts, until
/// [`Pipeline::release_results`], or until a monitor cleanup pass.
pub struct Pipeline {
    config: PipelineConfig,
    monitor: Arc<ResourceMonitor>,
    handles: DisplayHandles,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    last_run: Mutex<Option<RetainedRun>>,
}

/// Display handles of the latest run and the callback that would release them.
struct RetainedRun {
    cleanup: Option<CleanupId>,
    handles: Vec<DisplayHandle>,
}

impl Pipeline {
    /// Create a pipeline backed by this host's memory signal.
    ///
    /// Starts the monitor timer unless the configuration says otherwise.
    pub fn new(config: PipelineConfig) -> PixelsmithResult<Self> {
        config.validate()?;
        let monitor = Arc::new(
            ResourceMonitor::system()
                .with_threshold(config.pressure_threshold)
                .with_interval(config.monitor_interval()),
        );
        if config.start_monitor {
            monitor.start()?;
        }
        Ok(Self::assemble(config, monitor))
    }

    /// Create a pipeline around an existing monitor. The monitor is used as-is.
    pub fn with_monitor(config: PipelineConfig, monitor: Arc<ResourceMonitor>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config, monitor))
    }

    fn assemble(config: PipelineConfig, monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            config,
            monitor,
            handles: DisplayHandles::new(),
            pool: Mutex::new(None),
            last_run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The shared resource monitor.
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// Display handles for every result this pipeline produced.
    pub fn handles(&self) -> &DisplayHandles {
        &self.handles
    }

    /// Memory figures for display.
    pub fn memory_info(&self) -> MemoryInfo {
        self.monitor.memory_info()
    }

    fn pool(&self) -> Result<Arc<WorkerPool>, BatchError> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref().filter(|p| !p.is_terminated()) {
            return Ok(Arc::clone(pool));
        }

        let pool = WorkerPool::new(self.config.pool_size_cap, &self.monitor)
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Process `items` with `options`.
    ///
    /// `on_progress` is called from batch threads as each item starts.
    pub fn process_images(
        &self,
        items: Vec<SourceItem>,
        options: &ProcessingOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchReport, BatchError> {
        self.release_results();

        let pool: Arc<dyn ExecutionPool> = self.pool()?;
        let scheduler = BatchScheduler::new(Arc::clone(&self.monitor), pool, self.handles.clone())
            .with_tiers(self.config.effective_tiers())
            .with_backpressure_pause(self.config.backpressure_pause());

        let report = scheduler.process_batch(items, options, on_progress)?;
        *self.last_run.lock() = Some(RetainedRun {
            cleanup: report.cleanup,
            handles: report.results.iter().map(|r| r.display.clone()).collect(),
        });

        if report.errors.iter().any(|e| e.error.is_retryable()) {
            log::warn!("Worker dispatch failed during the run; the pool will be rebuilt");
            self.terminate_pool();
        }
        Ok(report)
    }

    /// Release the display handles of the latest run and withdraw its
    /// monitor callback. Returns the number of handles released.
    pub fn release_results(&self) -> usize {
        let Some(run) = self.last_run.lock().take() else {
            return 0;
        };
        if let Some(id) = run.cleanup {
            self.monitor.unregister_cleanup(id);
        }
        self.handles.release_all(run.handles.iter())
    }

    /// Tear down the worker pool. Returns whether a live pool was terminated.
    pub fn terminate_pool(&self) -> bool {
        let Some(pool) = self.pool.lock().take() else {
            return false;
        };
        if let Some(id) = pool.cleanup_id() {
            self.monitor.unregister_cleanup(id);
        }
        if pool.is_terminated() {
            return false;
        }
        pool.terminate();
        true
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release_results();
        self.terminate_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::{BatchConfig, BatchTiers};
    use crate::core::types::{Surface, TargetFormat, WatermarkPosition};
    use crate::resources::{ManualProbe, UnavailableProbe};
    use crate::transform;
    use image::Rgba;
    use std::time::{Duration, Instant};

    fn jpeg(name: &str, width: u32, height: u32) -> SourceItem {
        let surface = Surface::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]));
        let bytes = transform::convert_format(&surface, TargetFormat::Jpeg, 0.9).unwrap();
        SourceItem::new(name, "image/jpeg", bytes)
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::with_monitor(config, Arc::new(ResourceMonitor::new(Arc::new(UnavailableProbe)))).unwrap()
    }

    #[test]
    fn test_three_jpegs_to_png_at_width_100() {
        let pipeline = pipeline(PipelineConfig::default());
        let items = vec![jpeg("wide.jpg", 200, 100), jpeg("square.jpg", 300, 300), jpeg("tall.jpg", 100, 400)];
        let options = ProcessingOptions::new()
            .with_format(TargetFormat::Png)
            .with_quality(0.9)
            .with_width(100)
            .with_aspect_ratio(true);

        let mut report = pipeline.process_images(items, &options, None).unwrap();
        report.sort_by_input_order();

        assert!(report.errors.is_empty());
        let dims: Vec<(u32, u32)> = report.results.iter().map(|r| (r.width, r.height)).collect();
        assert_eq!(dims, vec![(100, 50), (100, 100), (100, 400)]);
        for result in &report.results {
            assert_eq!(result.target_format, TargetFormat::Png);
            assert_eq!(result.operation, "resize + PNG");
            assert_eq!(image::guess_format(&result.bytes).unwrap(), image::ImageFormat::Png);
            let decoded = image::load_from_memory(&result.bytes).unwrap();
            assert_eq!(decoded.width(), 100);
        }
    }

    #[test]
    fn test_empty_input_reports_nothing() {
        let pipeline = pipeline(PipelineConfig::default());
        let calls = Arc::new(Mutex::new(0));
        let sink = calls.clone();
        let callback: ProgressCallback = Arc::new(move |_| *sink.lock() += 1);

        let report = pipeline
            .process_images(Vec::new(), &ProcessingOptions::default(), Some(callback))
            .unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_single_zero_byte_file() {
        let pipeline = pipeline(PipelineConfig::default());
        let report = pipeline
            .process_images(
                vec![SourceItem::new("empty.jpg", "image/jpeg", Vec::new())],
                &ProcessingOptions::default(),
                None,
            )
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error.kind(), "decode");
        assert_eq!(report.errors[0].file_name, "empty.jpg");
    }

    #[test]
    fn test_partial_failure_with_concurrent_batches() {
        let config = PipelineConfig::new().with_tiers(BatchTiers::uniform(BatchConfig::new(3, 2)));
        let pipeline = pipeline(config);

        let mut items = Vec::new();
        for i in 0..10 {
            if i % 3 == 0 {
                items.push(SourceItem::new(format!("bad{}.jpg", i), "image/jpeg", vec![0u8; 16]));
            } else {
                items.push(jpeg(&format!("ok{}.jpg", i), 32, 16));
            }
        }

        let report = pipeline
            .process_images(items, &ProcessingOptions::new().with_width(16), None)
            .unwrap();
        assert_eq!(report.results.len(), 6);
        assert_eq!(report.errors.len(), 4);
        assert!(report.is_partial());
    }

    #[test]
    fn test_caller_context_transforms() {
        let pipeline = pipeline(PipelineConfig::default());
        let options = ProcessingOptions::new()
            .with_upscale(2)
            .with_watermark("sample", WatermarkPosition::TopLeft)
            .with_format(TargetFormat::Webp);

        let report = pipeline
            .process_images(vec![jpeg("a.jpg", 40, 30)], &options, None)
            .unwrap();
        let result = &report.results[0];
        assert_eq!((result.width, result.height), (80, 60));
        assert_eq!(result.operation, "2x upscale + watermark + WEBP");
        assert_eq!(result.output_file_name(), "a.webp");
    }

    #[test]
    fn test_pressure_degrades_and_pauses() {
        let probe = Arc::new(ManualProbe::with_sample(95, 100));
        let monitor = Arc::new(ResourceMonitor::new(probe.clone()));
        let config = PipelineConfig::new()
            .with_tiers(BatchTiers::uniform(BatchConfig::new(1, 2)))
            .with_backpressure_pause(Duration::from_secs(1));
        let pipeline = Pipeline::with_monitor(config, monitor).unwrap();

        let items: Vec<SourceItem> = (0..3).map(|i| jpeg(&format!("{}.jpg", i), 8, 8)).collect();
        let started = Instant::now();
        let report = pipeline.process_images(items, &ProcessingOptions::default(), None).unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(report.degraded);
        assert_eq!(report.batch_sizes, vec![2, 1]);
        assert_eq!(report.results.len(), 3);
        assert!(probe.reclaim_count() >= 1);
    }

    #[test]
    fn test_pool_is_rebuilt_after_termination() {
        let pipeline = pipeline(PipelineConfig::default());
        let options = ProcessingOptions::new().with_format(TargetFormat::Png);

        pipeline.process_images(vec![jpeg("a.jpg", 8, 8)], &options, None).unwrap();
        assert!(pipeline.terminate_pool());
        assert!(!pipeline.terminate_pool());

        let report = pipeline.process_images(vec![jpeg("b.jpg", 8, 8)], &options, None).unwrap();
        assert_eq!(report.results.len(), 1);
    }

    #[test]
    fn test_monitor_cleanup_releases_handles_and_pool() {
        let pipeline = pipeline(PipelineConfig::default());
        let report = pipeline
            .process_images(vec![jpeg("a.jpg", 8, 8)], &ProcessingOptions::default(), None)
            .unwrap();
        assert_eq!(pipeline.handles().live_count(), 1);

        // Pool termination plus handle release.
        assert_eq!(pipeline.monitor().force_cleanup(), 2);
        assert_eq!(pipeline.handles().live_count(), 0);
        assert!(!report.results[0].display.is_live());

        let again = pipeline
            .process_images(vec![jpeg("b.jpg", 8, 8)], &ProcessingOptions::default(), None)
            .unwrap();
        assert_eq!(again.results.len(), 1);
    }

    #[test]
    fn test_repeated_runs_keep_handles_and_callbacks_bounded() {
        let memory = Arc::new(ManualProbe::with_sample(10, 100));
        let monitor = Arc::new(ResourceMonitor::new(memory));
        let pipeline = Pipeline::with_monitor(PipelineConfig::default(), monitor).unwrap();
        let options = ProcessingOptions::new().with_format(TargetFormat::Png);

        for run in 0..5 {
            let items: Vec<SourceItem> = (0..4).map(|i| jpeg(&format!("{}-{}.jpg", run, i), 8, 8)).collect();
            let report = pipeline.process_images(items, &options, None).unwrap();
            assert_eq!(report.results.len(), 4);
            drop(report);

            // Only the latest run is retained: its handles plus the pool and run callbacks.
            assert_eq!(pipeline.handles().live_count(), 4);
            assert_eq!(pipeline.monitor().pending_cleanups(), 2);
        }

        assert_eq!(pipeline.release_results(), 4);
        assert_eq!(pipeline.handles().live_count(), 0);
        assert_eq!(pipeline.handles().live_bytes(), 0);
        assert_eq!(pipeline.monitor().pending_cleanups(), 1);
        assert_eq!(pipeline.release_results(), 0);
    }

    #[test]
    fn test_pool_rebuilds_do_not_pile_up_callbacks() {
        let pipeline = pipeline(PipelineConfig::default());
        let options = ProcessingOptions::new().with_format(TargetFormat::Png);

        for _ in 0..3 {
            pipeline.process_images(vec![jpeg("a.jpg", 8, 8)], &options, None).unwrap();
            assert!(pipeline.terminate_pool());
        }
        // Only the latest run's handle-release callback is left.
        assert_eq!(pipeline.monitor().pending_cleanups(), 1);
    }

    #[test]
    fn test_oversized_item_fails_alone() {
        let pipeline = pipeline(PipelineConfig::default());
        let big = Surface::from_pixel(1300, 1300, Rgba([0, 0, 0, 255]));
        let big_png = transform::convert_format(&big, TargetFormat::Png, 0.9).unwrap();
        let items = vec![
            SourceItem::new("big.png", "image/png", big_png),
            jpeg("small.jpg", 8, 8),
        ];

        let report = pipeline
            .process_images(items, &ProcessingOptions::new().with_upscale(8), None)
            .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!((report.results[0].width, report.results[0].height), (64, 64));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].file_name, "big.png");
        assert_eq!(report.errors[0].error.kind(), "context");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig::new().with_pool_size_cap(9);
        let monitor = Arc::new(ResourceMonitor::new(Arc::new(UnavailableProbe)));
        assert!(Pipeline::with_monitor(config, monitor).is_err());
    }
}
