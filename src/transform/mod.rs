//! Pure image operations.
//!
//! Every primitive takes a [`Surface`] by reference and returns a new one, so
//! the same decoded input can be shared between threads. [`apply_pipeline`]
//! chains them in the fixed per-item order.

pub mod codec;
pub mod font;
pub mod resize;
pub mod upscale;
pub mod watermark;

pub use codec::{compress, convert_format, decode, quality_percent};
pub use resize::{resize, target_dimensions};
pub use upscale::{upscale, upscale_fast};
pub use watermark::watermark;

use crate::core::error::{ProcessingError, ProcessingResult};
use crate::core::types::{ProcessingOptions, Surface, TargetFormat};
use std::borrow::Cow;

/// Largest surface any stage may allocate, in pixels (400 MB of RGBA).
pub const MAX_OUTPUT_PIXELS: u64 = 100_000_000;

/// Fail the item when a `width` x `height` surface would be too large.
pub fn check_area(width: u64, height: u64) -> ProcessingResult<()> {
    match width.checked_mul(height) {
        Some(area) if area <= MAX_OUTPUT_PIXELS => Ok(()),
        _ => Err(ProcessingError::Context(format!(
            "{}x{} exceeds the {} pixel limit",
            width, height, MAX_OUTPUT_PIXELS
        ))),
    }
}

/// Encoded output of a transform run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Run every active transform: upscale, watermark, compress, resize, encode.
///
/// Watermark and compression see the pre-downscale image.
pub fn apply_pipeline(surface: &Surface, options: &ProcessingOptions) -> ProcessingResult<EncodedImage> {
    let mut current: Cow<'_, Surface> = Cow::Borrowed(surface);

    if options.needs_upscale() {
        let factor = u64::from(options.upscale_factor);
        check_area(u64::from(current.width()) * factor, u64::from(current.height()) * factor)?;
        current = Cow::Owned(if options.fast_upscale {
            upscale_fast(&current, options.upscale_factor)
        } else {
            upscale(&current, options.upscale_factor)
        });
    }

    if let Some(text) = options.watermark_text.as_deref().filter(|t| !t.is_empty()) {
        current = Cow::Owned(watermark(&current, text, options.watermark_position));
    }

    if let Some(level) = options.compression_level.filter(|&l| l < 1.0) {
        current = Cow::Owned(compress(&current, level)?);
    }

    resize_and_encode(
        &current,
        options.width,
        options.height,
        options.maintain_aspect_ratio,
        options.target_format,
        options.quality,
    )
}

/// Resize then encode. This is the whole job a worker context runs.
pub fn resize_and_encode(
    surface: &Surface,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect_ratio: bool,
    format: TargetFormat,
    quality: f32,
) -> ProcessingResult<EncodedImage> {
    let resized = if width.is_some() || height.is_some() {
        let (src_width, src_height) = surface.dimensions();
        let (out_width, out_height) =
            target_dimensions(src_width, src_height, width, height, maintain_aspect_ratio);
        check_area(u64::from(out_width), u64::from(out_height))?;
        Cow::Owned(resize(surface, width, height, maintain_aspect_ratio))
    } else {
        Cow::Borrowed(surface)
    };

    let bytes = convert_format(&resized, format, quality)?;
    let (width, height) = resized.dimensions();

    Ok(EncodedImage { bytes, width, height })
}
