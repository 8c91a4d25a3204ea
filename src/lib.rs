//! # Pixelsmith - Batch Image Processing
//!
//! Pixelsmith takes a list of images and a set of transform options, spreads
//! the work over a bounded pool of workers, watches memory while it runs, and
//! returns a structured report of what succeeded and what failed.
//!
//! ## Features
//!
//! - **Transforms**: resize, upscale, watermark, lossy compression and format conversion
//! - **Bounded Parallelism**: at most four worker contexts, batches run in chunks
//! - **Backpressure**: batch size halves and the run pauses when memory pressure is high
//! - **Partial Results**: one bad input never fails the rest of the batch
//! - **Metadata**: EXIF inspection and stripping for single images
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pixelsmith::prelude::*;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//!
//! let items = vec![SourceItem::from_path("holiday.jpg")?];
//! let options = ProcessingOptions::new()
//!     .with_format(TargetFormat::Png)
//!     .with_width(800);
//!
//! let mut report = pipeline.process_images(items, &options, None)?;
//! report.sort_by_input_order();
//! for result in &report.results {
//!     std::fs::write(result.output_file_name(), &result.bytes)?;
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Value types, batch sizing, display handles and errors
//! - [`transform`]: Pure image operations and the per-item pipeline
//! - [`resources`]: Memory probes and the cleanup registry
//! - [`execution`]: Worker pool, batch scheduler, progress and metrics
//! - [`pipeline`]: The high-level entry point
//! - [`metadata`]: EXIF inspection and removal

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod execution;
pub mod metadata;
pub mod pipeline;
pub mod resources;
pub mod transform;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use pixelsmith::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{
        ProcessedImage, ProcessingOptions, SourceItem, Surface, TargetFormat, WatermarkPosition,
    };
    pub use crate::core::batch::{BatchConfig, BatchTiers};
    pub use crate::core::handle::{DisplayHandle, DisplayHandles};

    // Errors
    pub use crate::core::error::{
        BatchError, ConfigError, PixelsmithError, PixelsmithResult, ProcessingError,
    };

    // Configuration
    pub use crate::config::PipelineConfig;

    // Resources
    pub use crate::resources::{ManualProbe, MemoryInfo, MemoryProbe, ResourceMonitor, SystemProbe};

    // Execution
    pub use crate::execution::{
        BatchReport, BatchScheduler, ExecutionPool, InlinePool, ItemError, PerformanceMetrics,
        Progress, ProgressCallback, SchedulerState, WorkerPool,
    };

    // Entry points
    pub use crate::metadata::{extract_fields, strip_fields, SimplifiedMetadata};
    pub use crate::pipeline::Pipeline;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
