//! Smooth integer upscaling.
//!
//! Large factors are split into chained passes of at most 2x; a single big
//! pass needs far more scratch memory and fails more often on huge inputs.

use crate::core::types::Surface;
use image::imageops::{self, FilterType};

/// Largest scale applied in one pass.
pub const MAX_PASS_FACTOR: f64 = 2.0;

const EPSILON: f64 = 1e-9;

/// Per-pass scale factors whose product is `factor`.
pub fn pass_factors(factor: u32) -> Vec<f64> {
    let mut passes = Vec::new();
    let mut remaining = factor as f64;

    while remaining > 1.0 + EPSILON {
        let step = remaining.min(MAX_PASS_FACTOR);
        passes.push(step);
        remaining /= step;
    }

    passes
}

fn scaled(value: u32, step: f64) -> u32 {
    ((value as f64 * step).round() as u32).max(1)
}

/// Upscale with bilinear interpolation, chaining passes of at most 2x.
pub fn upscale(surface: &Surface, factor: u32) -> Surface {
    let mut current: Option<Surface> = None;

    for step in pass_factors(factor) {
        let source = current.as_ref().unwrap_or(surface);
        let (width, height) = source.dimensions();
        let next = imageops::resize(
            source,
            scaled(width, step),
            scaled(height, step),
            FilterType::Triangle,
        );
        current = Some(next);
    }

    current.unwrap_or_else(|| surface.clone())
}

/// Single-pass upscale with a sharper filter.
///
/// Faster than [`upscale`] for small inputs, but its peak memory grows with
/// the full factor.
pub fn upscale_fast(surface: &Surface, factor: u32) -> Surface {
    if factor <= 1 {
        return surface.clone();
    }
    let (width, height) = surface.dimensions();
    imageops::resize(
        surface,
        width.saturating_mul(factor),
        height.saturating_mul(factor),
        FilterType::CatmullRom,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> Surface {
        Surface::from_fn(width, height, |x, y| Rgba([(x * 7) as u8, (y * 5) as u8, 128, 255]))
    }

    #[test]
    fn test_pass_plan() {
        assert!(pass_factors(1).is_empty());
        assert_eq!(pass_factors(2), vec![2.0]);
        assert_eq!(pass_factors(4), vec![2.0, 2.0]);
        assert_eq!(pass_factors(3), vec![2.0, 1.5]);
        let product: f64 = pass_factors(7).iter().product();
        assert!((product - 7.0).abs() < 1e-6);
        assert!(pass_factors(7).iter().all(|&step| step <= MAX_PASS_FACTOR));
    }

    #[test]
    fn test_factor_one_is_identity() {
        let surface = gradient(10, 6);
        assert_eq!(upscale(&surface, 1), surface);
        assert_eq!(upscale_fast(&surface, 1), surface);
    }

    #[test]
    fn test_chained_passes_compose() {
        let surface = gradient(13, 9);
        let twice = upscale(&upscale(&surface, 2), 2);
        let once = upscale(&surface, 4);
        assert_eq!(twice.dimensions(), once.dimensions());
        assert_eq!(once.dimensions(), (52, 36));
    }

    #[test]
    fn test_odd_factor_dimensions() {
        let surface = gradient(11, 7);
        assert_eq!(upscale(&surface, 3).dimensions(), (33, 21));
        assert_eq!(upscale_fast(&surface, 3).dimensions(), (33, 21));
    }
}
