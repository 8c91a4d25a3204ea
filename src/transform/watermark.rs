//! Translucent text overlay.
//!
//! Text is set in the built-in bitmap font ([`super::font`]), scaled so each
//! font cell becomes a square block of pixels. Lit cells are filled in
//! translucent white; a thin dark outline around them keeps the text legible
//! on light backgrounds.

use crate::core::types::{Surface, WatermarkPosition};
use crate::transform::font::{self, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use image::Rgba;
use imageproc::drawing::{draw_filled_rect_mut, Blend, Canvas};
use imageproc::rect::Rect;

/// Distance from the surface edge for corner anchors.
pub const MARGIN: i64 = 20;
/// Smallest font size in pixels.
pub const MIN_FONT_SIZE: u32 = 12;
/// Largest font size in pixels.
pub const MAX_FONT_SIZE: u32 = 48;

const FILL: Rgba<u8> = Rgba([255, 255, 255, 178]);
const STROKE: Rgba<u8> = Rgba([0, 0, 0, 128]);

/// Placement of a watermark on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLayout {
    /// Nominal font size in pixels.
    pub font_size: u32,
    /// Edge length of one font cell in pixels.
    pub cell: u32,
    /// Rendered text width in pixels.
    pub width: u32,
    /// Rendered text height in pixels.
    pub height: u32,
    /// Left edge; may be negative when the text is wider than the surface.
    pub x: i64,
    /// Top edge.
    pub y: i64,
}

/// Font size for a surface: a twentieth of the short side, clamped.
pub fn font_size_for(width: u32, height: u32) -> u32 {
    (width.min(height) / 20).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Measure and place `text` on a `width` x `height` surface.
pub fn layout(width: u32, height: u32, text: &str, position: WatermarkPosition) -> TextLayout {
    let font_size = font_size_for(width, height);
    let cell = ((font_size as f64 / GLYPH_HEIGHT as f64).round() as u32).max(1);

    let chars = text.chars().count() as u32;
    let text_width = (chars * GLYPH_ADVANCE * cell).saturating_sub(cell);
    let text_height = GLYPH_HEIGHT * cell;

    let (w, h) = (width as i64, height as i64);
    let (tw, th) = (text_width as i64, text_height as i64);

    let (x, y) = match position {
        WatermarkPosition::TopLeft => (MARGIN, MARGIN),
        WatermarkPosition::TopRight => (w - tw - MARGIN, MARGIN),
        WatermarkPosition::BottomLeft => (MARGIN, h - th - MARGIN),
        WatermarkPosition::BottomRight => (w - tw - MARGIN, h - th - MARGIN),
        WatermarkPosition::Center => ((w - tw) / 2, (h - th) / 2),
    };

    TextLayout {
        font_size,
        cell,
        width: text_width,
        height: text_height,
        x,
        y,
    }
}

/// Draw `text` over a copy of `surface`.
pub fn watermark(surface: &Surface, text: &str, position: WatermarkPosition) -> Surface {
    if text.is_empty() {
        return surface.clone();
    }

    let (width, height) = surface.dimensions();
    let placement = layout(width, height, text, position);
    let stroke = (placement.cell / 2).max(1);
    let mask = GlyphMask::render(text, placement.cell, stroke);

    let mut canvas = Blend(surface.clone());
    let origin_x = placement.x - stroke as i64;
    let origin_y = placement.y - stroke as i64;

    for (mx, my) in mask.outline(stroke) {
        let x = origin_x + mx as i64;
        let y = origin_y + my as i64;
        if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
            canvas.draw_pixel(x as u32, y as u32, STROKE);
        }
    }

    for (index, c) in text.chars().enumerate() {
        let rows = font::glyph(c);
        let glyph_x = placement.x + (index as u32 * GLYPH_ADVANCE * placement.cell) as i64;
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !font::is_lit(&rows, col, row) {
                    continue;
                }
                let x = glyph_x + (col * placement.cell) as i64;
                let y = placement.y + (row * placement.cell) as i64;
                let rect = Rect::at(x as i32, y as i32).of_size(placement.cell, placement.cell);
                draw_filled_rect_mut(&mut canvas, rect, FILL);
            }
        }
    }

    canvas.0
}

/// Pixel mask of the rendered text, padded by the stroke width on every side.
struct GlyphMask {
    width: usize,
    height: usize,
    lit: Vec<bool>,
}

impl GlyphMask {
    fn render(text: &str, cell: u32, pad: u32) -> Self {
        let chars = text.chars().count() as u32;
        let text_width = (chars * GLYPH_ADVANCE * cell).saturating_sub(cell);
        let width = (text_width + 2 * pad) as usize;
        let height = (GLYPH_HEIGHT * cell + 2 * pad) as usize;
        let mut lit = vec![false; width * height];

        for (index, c) in text.chars().enumerate() {
            let rows = font::glyph(c);
            let glyph_x = pad + index as u32 * GLYPH_ADVANCE * cell;
            for row in 0..GLYPH_HEIGHT {
                for col in 0..GLYPH_WIDTH {
                    if !font::is_lit(&rows, col, row) {
                        continue;
                    }
                    let left = (glyph_x + col * cell) as usize;
                    let top = (pad + row * cell) as usize;
                    for y in top..top + cell as usize {
                        for x in left..left + cell as usize {
                            lit[y * width + x] = true;
                        }
                    }
                }
            }
        }

        Self { width, height, lit }
    }

    fn is_lit(&self, x: usize, y: usize) -> bool {
        self.lit[y * self.width + x]
    }

    /// Unlit pixels within `radius` (Chebyshev distance) of a lit pixel.
    fn outline(&self, radius: u32) -> Vec<(usize, usize)> {
        let r = radius as usize;
        let mut pixels = Vec::new();

        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_lit(x, y) {
                    continue;
                }
                let near = (y.saturating_sub(r)..=(y + r).min(self.height - 1)).any(|ny| {
                    (x.saturating_sub(r)..=(x + r).min(self.width - 1)).any(|nx| self.is_lit(nx, ny))
                });
                if near {
                    pixels.push((x, y));
                }
            }
        }

        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> Surface {
        Surface::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_font_size_is_clamped() {
        assert_eq!(font_size_for(100, 100), MIN_FONT_SIZE);
        assert_eq!(font_size_for(600, 400), 20);
        assert_eq!(font_size_for(4000, 3000), MAX_FONT_SIZE);
    }

    #[test]
    fn test_corner_layouts_use_margins() {
        let top_left = layout(400, 300, "AB", WatermarkPosition::TopLeft);
        assert_eq!((top_left.x, top_left.y), (20, 20));

        // font 15 -> cell 2 -> width 2*6*2-2 = 22, height 14
        let bottom_right = layout(400, 300, "AB", WatermarkPosition::BottomRight);
        assert_eq!(bottom_right.cell, 2);
        assert_eq!((bottom_right.width, bottom_right.height), (22, 14));
        assert_eq!((bottom_right.x, bottom_right.y), (400 - 22 - 20, 300 - 14 - 20));

        let center = layout(400, 300, "AB", WatermarkPosition::Center);
        assert_eq!((center.x, center.y), ((400 - 22) / 2, (300 - 14) / 2));
    }

    #[test]
    fn test_watermark_draws_in_anchor_corner() {
        let surface = black(200, 200);
        let out = watermark(&surface, "A", WatermarkPosition::BottomRight);
        let placement = layout(200, 200, "A", WatermarkPosition::BottomRight);

        // Top row of 'A' lights columns 1..=3.
        let x = (placement.x as u32) + placement.cell;
        let y = placement.y as u32;
        assert!(out.get_pixel(x, y)[0] > 100);
        assert_eq!(out.get_pixel(10, 10), surface.get_pixel(10, 10));
        assert_eq!(surface.get_pixel(x, y)[0], 0, "input must stay untouched");
    }

    #[test]
    fn test_empty_text_is_identity() {
        let surface = black(50, 40);
        assert_eq!(watermark(&surface, "", WatermarkPosition::Center), surface);
    }

    #[test]
    fn test_oversized_text_is_clipped() {
        let surface = black(30, 30);
        let out = watermark(&surface, "A VERY LONG WATERMARK", WatermarkPosition::TopRight);
        assert_eq!(out.dimensions(), (30, 30));
    }

    #[test]
    fn test_outline_surrounds_fill() {
        let mask = GlyphMask::render("I", 1, 1);
        let outline = mask.outline(1);
        assert!(!outline.is_empty());
        assert!(outline.iter().all(|&(x, y)| !mask.is_lit(x, y)));
    }
}
