//! Frame annotation: detection boxes, per-stream counters and the statistics
//! view rendered from the rolling log.
//!
//! Text uses a TrueType font when one is configured and the built-in bitmap
//! font otherwise.

mod glyphs;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::PixelBox;
use crate::monitor::rolling_log::{LINE_HEIGHT, TOP_MARGIN};

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const BOX_THICKNESS: i32 = 4;
/// Narrowest statistics view in live mode.
pub const MIN_STATS_WIDTH: u32 = 345;

const FONT_SIZE: f32 = 14.0;
const TEXT_LEFT: i32 = 10;

/// Counters drawn onto an annotated stream frame.
#[derive(Clone, Copy, Debug)]
pub struct Overlay<'a> {
    pub pipelined: bool,
    pub label: &'a str,
    pub total: u64,
    pub current: u32,
}

pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Annotator using the built-in bitmap font.
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        let Some(path) = font_path else {
            return Ok(Self::new());
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        log::info!("overlay font loaded from {}", path.display());
        Ok(Self { font: Some(font) })
    }

    /// Draw thick boxes, already scaled to `frame`'s pixel space.
    pub fn draw_boxes(&self, frame: &mut RgbImage, boxes: &[PixelBox]) {
        // Keep edges just outside the frame so off-frame sides stay invisible.
        let max_x = (frame.width().min(i32::MAX as u32) as i32).saturating_add(BOX_THICKNESS);
        let max_y = (frame.height().min(i32::MAX as u32) as i32).saturating_add(BOX_THICKNESS);
        for pixel_box in boxes {
            let xmin = pixel_box.xmin.clamp(-BOX_THICKNESS, max_x);
            let ymin = pixel_box.ymin.clamp(-BOX_THICKNESS, max_y);
            let xmax = pixel_box.xmax.clamp(-BOX_THICKNESS, max_x);
            let ymax = pixel_box.ymax.clamp(-BOX_THICKNESS, max_y);
            let width = xmax.saturating_sub(xmin).max(1) as u32;
            let height = ymax.saturating_sub(ymin).max(1) as u32;
            for offset in 0..BOX_THICKNESS {
                let rect = Rect::at(xmin - offset, ymin - offset)
                    .of_size(width + 2 * offset as u32, height + 2 * offset as u32);
                draw_hollow_rect_mut(frame, rect, BOX_COLOR);
            }
        }
    }

    /// Mode line at the top, current and total counts at the bottom.
    pub fn draw_overlay(&self, frame: &mut RgbImage, overlay: &Overlay<'_>) {
        let height = frame.height() as i32;
        let mode = if overlay.pipelined {
            "Async mode is on."
        } else {
            "Async mode is off."
        };
        self.draw_line(frame, mode, 15, 15);
        self.draw_line(
            frame,
            &format!("Current {} count: {}", overlay.label, overlay.current),
            TEXT_LEFT,
            height - 30,
        );
        self.draw_line(
            frame,
            &format!("Total {} count: {}", overlay.label, overlay.total),
            TEXT_LEFT,
            height - 10,
        );
    }

    /// Render rolling-log entries, one per line, on a black canvas.
    pub fn render_stats(&self, entries: &[String], width: u32, height: u32) -> RgbImage {
        let mut stats = RgbImage::new(width.max(1), height.max(1));
        for (i, entry) in entries.iter().enumerate() {
            let baseline = i as i32 * LINE_HEIGHT as i32 + TOP_MARGIN as i32;
            self.draw_line(&mut stats, entry, TEXT_LEFT, baseline);
        }
        stats
    }

    /// Draw `text` with its baseline at `baseline`.
    fn draw_line(&self, image: &mut RgbImage, text: &str, x: i32, baseline: i32) {
        match &self.font {
            Some(font) => {
                let top = baseline - FONT_SIZE as i32 + 3;
                draw_text_mut(image, TEXT_COLOR, x, top, PxScale::from(FONT_SIZE), font, text);
            }
            None => draw_bitmap_text(image, text, x, baseline - glyphs::GLYPH_HEIGHT as i32),
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

/// Size of the live-mode statistics view for `streams` streams.
pub fn live_stats_size(width: u32, height: u32, streams: usize) -> (u32, u32) {
    let rows_needed = streams as u32 * LINE_HEIGHT + TOP_MARGIN;
    (width.max(MIN_STATS_WIDTH), height.max(rows_needed))
}

fn draw_bitmap_text(image: &mut RgbImage, text: &str, x: i32, top: i32) {
    for (i, ch) in text.chars().enumerate() {
        let left = x + (i as u32 * glyphs::ADVANCE) as i32;
        if left >= image.width() as i32 {
            break;
        }
        for (row, bits) in glyphs::glyph(ch).iter().enumerate() {
            for col in 0..glyphs::GLYPH_WIDTH {
                if (bits >> (glyphs::GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let (px, py) = (left + col as i32, top + row as i32);
                if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height()
                {
                    image.put_pixel(px as u32, py as u32, TEXT_COLOR);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(image: &RgbImage, color: Rgb<u8>) -> usize {
        image.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn boxes_are_drawn_thick_and_clipped() {
        let annotator = Annotator::new();
        let mut frame = RgbImage::new(64, 64);
        annotator.draw_boxes(
            &mut frame,
            &[PixelBox {
                xmin: 20,
                ymin: 20,
                xmax: 40,
                ymax: 40,
            }],
        );
        assert_eq!(*frame.get_pixel(20, 30), BOX_COLOR);
        assert_eq!(*frame.get_pixel(17, 30), BOX_COLOR);
        assert_eq!(*frame.get_pixel(30, 30), Rgb([0, 0, 0]));

        // Boxes hanging off the frame are clipped, not a panic.
        annotator.draw_boxes(
            &mut frame,
            &[PixelBox {
                xmin: -10,
                ymin: 50,
                xmax: 90,
                ymax: 90,
            }],
        );
        assert!(lit(&frame, BOX_COLOR) > 0);
    }

    #[test]
    fn out_of_range_boxes_are_clamped_to_the_frame() {
        let annotator = Annotator::new();
        let mut frame = RgbImage::new(32, 32);
        annotator.draw_boxes(
            &mut frame,
            &[PixelBox {
                xmin: i32::MIN,
                ymin: 8,
                xmax: i32::MAX,
                ymax: 16,
            }],
        );
        assert_eq!(*frame.get_pixel(0, 8), BOX_COLOR);
        assert_eq!(*frame.get_pixel(31, 16), BOX_COLOR);
        assert_eq!(*frame.get_pixel(16, 12), Rgb([0, 0, 0]));
    }

    #[test]
    fn overlay_writes_text_in_the_corners() {
        let annotator = Annotator::new();
        let mut frame = RgbImage::new(300, 300);
        annotator.draw_overlay(
            &mut frame,
            &Overlay {
                pipelined: true,
                label: "person",
                total: 12,
                current: 2,
            },
        );
        let top = (0..300)
            .flat_map(|x| (0..20).map(move |y| (x, y)))
            .filter(|&(x, y)| *frame.get_pixel(x, y) == TEXT_COLOR)
            .count();
        let bottom = (0..300)
            .flat_map(|x| (260..300).map(move |y| (x, y)))
            .filter(|&(x, y)| *frame.get_pixel(x, y) == TEXT_COLOR)
            .count();
        assert!(top > 0);
        assert!(bottom > 0);
    }

    #[test]
    fn stats_view_has_one_row_per_entry() {
        let annotator = Annotator::new();
        let empty = annotator.render_stats(&[], 300, 300);
        assert_eq!(lit(&empty, TEXT_COLOR), 0);

        let entries = vec!["12:00:00 - person detected on Video 0".to_string(); 2];
        let stats = annotator.render_stats(&entries, 300, 300);
        let row_lit = |top: u32| {
            (0..300)
                .flat_map(|x| (top..top + 7).map(move |y| (x, y)))
                .any(|(x, y)| *stats.get_pixel(x, y) == TEXT_COLOR)
        };
        assert!(row_lit(8));
        assert!(row_lit(28));
        assert!(!row_lit(48));
    }

    #[test]
    fn live_stats_view_has_a_minimum_size() {
        assert_eq!(live_stats_size(300, 300, 3), (345, 300));
        assert_eq!(live_stats_size(400, 50, 4), (400, 95));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Annotator::load(Some(Path::new("/nonexistent/font.ttf"))).is_err());
        assert!(Annotator::load(None).is_ok());
    }
}
