//! Core value types that flow through the batch pipeline.
//!
//! Inputs are opaque blobs ([`SourceItem`]), the knobs for one run are a
//! [`ProcessingOptions`] value, and every successful item yields a
//! [`ProcessedImage`]. All of these are immutable once built; the scheduler
//! shares them across batch threads behind `Arc`.

use crate::core::error::BatchError;
use crate::core::handle::DisplayHandle;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A decoded bitmap that transforms operate on before re-encoding.
pub type Surface = RgbaImage;

/// Largest accepted upscale factor.
pub const MAX_UPSCALE_FACTOR: u32 = 8;

/// Largest accepted target width or height, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// An input image as handed over by the caller.
///
/// The bytes are never inspected until decode; the declared media type is
/// trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl SourceItem {
    /// Create a new source item from raw bytes.
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a source item from disk, guessing the media type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let media_type = TargetFormat::from_path(path)
            .map(|f| f.mime_type().to_string())
            .unwrap_or_else(|| media_type_for_extension(path));

        Ok(Self::new(name, media_type, bytes))
    }

    /// File name of the item.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared media type, e.g. `image/jpeg`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Raw encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the encoded input in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }
}

fn media_type_for_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Output containers a run can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
    Avif,
}

/// Where a watermark is anchored on the surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// Transform settings for one batch run.
///
/// Never mutated while a batch is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Integer upscale factor (1 disables upscaling).
    pub upscale_factor: u32,
    /// Upscale in one sharper pass instead of chained 2x passes.
    pub fast_upscale: bool,
    /// Output container.
    pub target_format: TargetFormat,
    /// Encoder quality in 0.1..=1.0.
    pub quality: f32,
    /// Target width in pixels.
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// Keep the source aspect ratio when resizing.
    pub maintain_aspect_ratio: bool,
    /// Lossy re-encode strength in 0.1..=1.0, where 1.0 is a no-op.
    pub compression_level: Option<f32>,
    /// Text drawn over the image.
    pub watermark_text: Option<String>,
    /// Anchor for the watermark text.
    pub watermark_position: WatermarkPosition,
}

/// One successfully processed source item.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Unique within a run: `{name}-{timestamp_ms}-{global_index}`.
    pub id: String,
    /// Position of the source item in the caller's input list.
    pub original_index: usize,
    /// The item this result was produced from.
    pub source: SourceItem,
    /// Encoded output.
    pub bytes: Arc<[u8]>,
    /// Handle a viewer uses to display the output.
    pub display: DisplayHandle,
    /// Input size in bytes.
    pub original_size: usize,
    /// Output size in bytes.
    pub processed_size: usize,
    /// Wall-clock time spent on this item.
    pub processing_time: Duration,
    /// Human-readable summary, e.g. `2x upscale + resize + PNG`.
    pub operation: String,
    /// Container of `bytes`.
    pub target_format: TargetFormat,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

// ============================================================================
// TargetFormat Implementation
// ============================================================================

impl TargetFormat {
    /// All supported formats.
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Jpeg,
        TargetFormat::Png,
        TargetFormat::Webp,
        TargetFormat::Avif,
    ];

    /// Determine format from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Determine format from a media type such as `image/png`.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        media_type
            .strip_prefix("image/")
            .and_then(|sub| sub.parse().ok())
    }

    /// MIME type of the container.
    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Png => "image/png",
            TargetFormat::Webp => "image/webp",
            TargetFormat::Avif => "image/avif",
        }
    }

    /// Preferred file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::Webp => "webp",
            TargetFormat::Avif => "avif",
        }
    }

    /// Uppercase label used in operation summaries.
    pub fn label(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Png => "PNG",
            TargetFormat::Webp => "WEBP",
            TargetFormat::Avif => "AVIF",
        }
    }

    /// Matching `image` crate format.
    pub fn to_image_format(&self) -> image::ImageFormat {
        match self {
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Png => image::ImageFormat::Png,
            TargetFormat::Webp => image::ImageFormat::WebP,
            TargetFormat::Avif => image::ImageFormat::Avif,
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(TargetFormat::Jpeg),
            "png" => Ok(TargetFormat::Png),
            "webp" => Ok(TargetFormat::Webp),
            "avif" => Ok(TargetFormat::Avif),
            other => Err(format!("Unknown target format: {}", other)),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// WatermarkPosition Implementation
// ============================================================================

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top-left" => Ok(WatermarkPosition::TopLeft),
            "top-right" => Ok(WatermarkPosition::TopRight),
            "bottom-left" => Ok(WatermarkPosition::BottomLeft),
            "bottom-right" => Ok(WatermarkPosition::BottomRight),
            "center" => Ok(WatermarkPosition::Center),
            other => Err(format!("Unknown watermark position: {}", other)),
        }
    }
}

// ============================================================================
// ProcessingOptions Implementation
// ============================================================================

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            upscale_factor: 1,
            fast_upscale: false,
            target_format: TargetFormat::Jpeg,
            quality: 0.9,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            compression_level: None,
            watermark_text: None,
            watermark_position: WatermarkPosition::BottomRight,
        }
    }
}

impl ProcessingOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output container.
    pub fn with_format(mut self, format: TargetFormat) -> Self {
        self.target_format = format;
        self
    }

    /// Set encoder quality.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Set target width.
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Set target height.
    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    /// Keep or drop the source aspect ratio.
    pub fn with_aspect_ratio(mut self, maintain: bool) -> Self {
        self.maintain_aspect_ratio = maintain;
        self
    }

    /// Set the upscale factor.
    pub fn with_upscale(mut self, factor: u32) -> Self {
        self.upscale_factor = factor;
        self
    }

    /// Use the single-pass upscaler.
    pub fn with_fast_upscale(mut self, fast: bool) -> Self {
        self.fast_upscale = fast;
        self
    }

    /// Set the compression level.
    pub fn with_compression(mut self, level: f32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Draw a watermark at the given position.
    pub fn with_watermark(mut self, text: impl Into<String>, position: WatermarkPosition) -> Self {
        self.watermark_text = Some(text.into());
        self.watermark_position = position;
        self
    }

    /// Reject options that break the processing contract.
    pub fn validate(&self) -> Result<(), BatchError> {
        if !(1..=MAX_UPSCALE_FACTOR).contains(&self.upscale_factor) {
            return Err(BatchError::InvalidOptions(format!(
                "upscale_factor must be within 1..={}, got {}",
                MAX_UPSCALE_FACTOR, self.upscale_factor
            )));
        }
        if !(0.1..=1.0).contains(&self.quality) {
            return Err(BatchError::InvalidOptions(format!(
                "quality must be within 0.1..=1.0, got {}",
                self.quality
            )));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(BatchError::InvalidOptions(
                "width and height must be positive".to_string(),
            ));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if let Some(value) = value.filter(|&v| v > MAX_DIMENSION) {
                return Err(BatchError::InvalidOptions(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_DIMENSION, value
                )));
            }
        }
        if let Some(level) = self.compression_level {
            if !(0.1..=1.0).contains(&level) {
                return Err(BatchError::InvalidOptions(format!(
                    "compression_level must be within 0.1..=1.0, got {}",
                    level
                )));
            }
        }
        Ok(())
    }

    /// Upscaling is requested.
    pub fn needs_upscale(&self) -> bool {
        self.upscale_factor > 1
    }

    /// A non-empty watermark is requested.
    pub fn needs_watermark(&self) -> bool {
        self.watermark_text.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Lossy compression is requested.
    pub fn needs_compression(&self) -> bool {
        self.compression_level.is_some_and(|level| level < 1.0)
    }

    /// A resize is requested.
    pub fn needs_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Whether the job must run in the caller's context instead of a worker.
    ///
    /// Upscaling, watermarking and compression are not available inside
    /// worker contexts.
    pub fn requires_caller_context(&self) -> bool {
        self.needs_upscale() || self.needs_watermark() || self.needs_compression()
    }

    /// Deterministic summary of the active operations.
    pub fn describe(&self) -> String {
        let mut operations = Vec::new();

        if self.needs_upscale() {
            operations.push(format!("{}x upscale", self.upscale_factor));
        }
        if self.needs_resize() {
            operations.push("resize".to_string());
        }
        if self.needs_watermark() {
            operations.push("watermark".to_string());
        }
        if self.needs_compression() {
            operations.push("compress".to_string());
        }
        operations.push(self.target_format.label().to_string());

        operations.join(" + ")
    }
}

// ============================================================================
// ProcessedImage Implementation
// ============================================================================

impl ProcessedImage {
    /// Build the run-unique identifier for a result.
    pub fn make_id(name: &str, timestamp_ms: u128, global_index: usize) -> String {
        format!("{}-{}-{}", name, timestamp_ms, global_index)
    }

    /// Suggested output file name: source stem plus the target extension.
    pub fn output_file_name(&self) -> String {
        format!("{}.{}", self.source.stem(), self.target_format.extension())
    }

    /// Output size as a fraction of the input size.
    pub fn size_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.processed_size as f64 / self.original_size as f64
    }

    /// Release the display handle; the encoded bytes stay available.
    pub fn release(&self) -> bool {
        self.display.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ProcessingOptions::default();
        assert_eq!(options.upscale_factor, 1);
        assert_eq!(options.target_format, TargetFormat::Jpeg);
        assert_eq!(options.watermark_position, WatermarkPosition::BottomRight);
        assert!(!options.requires_caller_context());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_operation_description_order() {
        let options = ProcessingOptions::new()
            .with_upscale(2)
            .with_width(100)
            .with_watermark("(c) me", WatermarkPosition::Center)
            .with_compression(0.5)
            .with_format(TargetFormat::Png);
        assert_eq!(options.describe(), "2x upscale + resize + watermark + compress + PNG");

        assert_eq!(ProcessingOptions::default().describe(), "JPEG");
    }

    #[test]
    fn test_full_compression_is_inactive() {
        let options = ProcessingOptions::new().with_compression(1.0);
        assert!(!options.needs_compression());
        assert!(!options.requires_caller_context());
    }

    #[test]
    fn test_empty_watermark_is_inactive() {
        let options = ProcessingOptions::new().with_watermark("", WatermarkPosition::TopLeft);
        assert!(!options.needs_watermark());
    }

    #[test]
    fn test_validate_rejects_contract_violations() {
        assert!(ProcessingOptions::new().with_upscale(0).validate().is_err());
        assert!(ProcessingOptions::new().with_quality(1.5).validate().is_err());
        assert!(ProcessingOptions::new().with_width(0).validate().is_err());
        assert!(ProcessingOptions::new().with_compression(0.0).validate().is_err());
    }

    #[test]
    fn test_validate_bounds_upscale_and_dimensions() {
        assert!(ProcessingOptions::new().with_upscale(MAX_UPSCALE_FACTOR).validate().is_ok());
        assert!(ProcessingOptions::new().with_upscale(100_000).validate().is_err());
        assert!(ProcessingOptions::new().with_width(MAX_DIMENSION).validate().is_ok());
        assert!(ProcessingOptions::new().with_width(MAX_DIMENSION + 1).validate().is_err());
        assert!(ProcessingOptions::new().with_height(u32::MAX).validate().is_err());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("jpg".parse::<TargetFormat>(), Ok(TargetFormat::Jpeg));
        assert_eq!("WEBP".parse::<TargetFormat>(), Ok(TargetFormat::Webp));
        assert!("bmp".parse::<TargetFormat>().is_err());
        assert_eq!(TargetFormat::from_media_type("image/png"), Some(TargetFormat::Png));
        assert_eq!(TargetFormat::from_media_type("text/plain"), None);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ProcessingOptions =
            serde_json::from_str(r#"{"target_format":"webp","width":320,"watermark_position":"top-left"}"#)
                .unwrap();
        assert_eq!(options.target_format, TargetFormat::Webp);
        assert_eq!(options.width, Some(320));
        assert_eq!(options.watermark_position, WatermarkPosition::TopLeft);
        assert_eq!(options.quality, 0.9);
    }

    #[test]
    fn test_source_item_stem() {
        let item = SourceItem::new("holiday.photo.jpg", "image/jpeg", vec![1u8, 2, 3]);
        assert_eq!(item.stem(), "holiday.photo");
        assert_eq!(item.size(), 3);
        let hidden = SourceItem::new(".hidden", "image/png", Vec::new());
        assert_eq!(hidden.stem(), ".hidden");
    }
}
