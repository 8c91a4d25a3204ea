//! Core types for the Pixelsmith batch pipeline.
//!
//! This module contains the foundational pieces every other module builds on:
//! - Value types (source items, options, processed results)
//! - Batch sizing and partitioning
//! - Display handles for generated outputs
//! - Error types

pub mod batch;
pub mod error;
pub mod handle;
pub mod types;

// Re-export commonly used types
pub use batch::{Batch, BatchConfig, BatchTiers};
pub use error::{BatchError, ConfigError, PixelsmithError, PixelsmithResult, ProcessingError, ProcessingResult};
pub use handle::{DisplayHandle, DisplayHandles};
pub use types::{ProcessedImage, ProcessingOptions, SourceItem, Surface, TargetFormat, WatermarkPosition};
