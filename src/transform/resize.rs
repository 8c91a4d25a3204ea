//! Resize with aspect-ratio policies.

use crate::core::types::Surface;
use image::imageops::{self, FilterType};

/// Compute output dimensions for a resize request.
///
/// - neither dimension: source size
/// - aspect kept, one dimension: the other follows the source aspect ratio
/// - aspect kept, both: fit inside the box using the smaller scale
/// - aspect dropped: exact stretch, a missing dimension keeps the source size
pub fn target_dimensions(
    src_width: u32,
    src_height: u32,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect_ratio: bool,
) -> (u32, u32) {
    if src_width == 0 || src_height == 0 {
        return (src_width, src_height);
    }

    let (new_width, new_height) = match (width, height, maintain_aspect_ratio) {
        (None, None, _) => (src_width, src_height),
        (w, h, false) => (w.unwrap_or(src_width), h.unwrap_or(src_height)),
        (Some(w), None, true) => {
            let aspect = src_width as f64 / src_height as f64;
            (w, (w as f64 / aspect).round() as u32)
        }
        (None, Some(h), true) => {
            let aspect = src_width as f64 / src_height as f64;
            ((h as f64 * aspect).round() as u32, h)
        }
        (Some(w), Some(h), true) => {
            let ratio = (w as f64 / src_width as f64).min(h as f64 / src_height as f64);
            (
                (src_width as f64 * ratio).round() as u32,
                (src_height as f64 * ratio).round() as u32,
            )
        }
    };

    (new_width.max(1), new_height.max(1))
}

/// Resize a surface. Returns a copy when no resize is needed.
pub fn resize(
    surface: &Surface,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect_ratio: bool,
) -> Surface {
    let (src_width, src_height) = surface.dimensions();
    let (new_width, new_height) =
        target_dimensions(src_width, src_height, width, height, maintain_aspect_ratio);

    if (new_width, new_height) == (src_width, src_height) {
        return surface.clone();
    }

    imageops::resize(surface, new_width, new_height, FilterType::Lanczos3)
}
