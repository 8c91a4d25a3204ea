//! Decode, encode and lossy re-encode.

use crate::core::error::{ProcessingError, ProcessingResult};
use crate::core::types::{SourceItem, Surface, TargetFormat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

/// Speed preset for the AVIF encoder (1 = slowest, 10 = fastest).
#[cfg(feature = "avif")]
const AVIF_SPEED: u8 = 8;

/// Map a 0.1..=1.0 quality to the encoders' 1..=100 scale.
pub fn quality_percent(quality: f32) -> u8 {
    (quality.clamp(0.1, 1.0) * 100.0).round() as u8
}

/// Decode a source item into a surface.
pub fn decode(item: &SourceItem) -> ProcessingResult<Surface> {
    if item.bytes().is_empty() {
        return Err(ProcessingError::decode(item.name(), "input is empty"));
    }

    image::load_from_memory(item.bytes())
        .map(|img| img.to_rgba8())
        .map_err(|e| ProcessingError::decode(item.name(), e))
}

/// Encode a surface into the target container.
pub fn convert_format(
    surface: &Surface,
    format: TargetFormat,
    quality: f32,
) -> ProcessingResult<Vec<u8>> {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return Err(ProcessingError::Context(format!(
            "cannot encode an empty {}x{} surface",
            width, height
        )));
    }

    let mut output = Vec::new();
    let label = format.label();

    match format {
        TargetFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut output, quality_percent(quality));
            encoder
                .encode(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ProcessingError::encoding(label, e))?;
        }
        TargetFormat::Png => {
            PngEncoder::new(&mut output)
                .write_image(surface.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| ProcessingError::encoding(label, e))?;
        }
        TargetFormat::Webp => {
            // The bundled WebP encoder is lossless only, so quality has no effect.
            WebPEncoder::new_lossless(&mut output)
                .write_image(surface.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| ProcessingError::encoding(label, e))?;
        }
        TargetFormat::Avif => encode_avif(surface, quality, &mut output)?,
    }

    Ok(output)
}

#[cfg(feature = "avif")]
fn encode_avif(surface: &Surface, quality: f32, output: &mut Vec<u8>) -> ProcessingResult<()> {
    use image::codecs::avif::AvifEncoder;

    let (width, height) = surface.dimensions();
    AvifEncoder::new_with_speed_quality(output, AVIF_SPEED, quality_percent(quality))
        .write_image(surface.as_raw(), width, height, ExtendedColorType::Rgba8)
        .map_err(|e| ProcessingError::encoding(TargetFormat::Avif.label(), e))
}

#[cfg(not(feature = "avif"))]
fn encode_avif(_surface: &Surface, _quality: f32, _output: &mut Vec<u8>) -> ProcessingResult<()> {
    Err(ProcessingError::encoding(
        TargetFormat::Avif.label(),
        "this build has no AVIF encoder (enable the `avif` feature)",
    ))
}

/// Lossy round trip through JPEG at `level` quality.
///
/// Degrades visual detail, not just container size. Alpha is flattened.
pub fn compress(surface: &Surface, level: f32) -> ProcessingResult<Surface> {
    let encoded = convert_format(surface, TargetFormat::Jpeg, level)?;
    image::load_from_memory_with_format(&encoded, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgba8())
        .map_err(|e| ProcessingError::Context(format!("failed to reload compressed image: {}", e)))
}
