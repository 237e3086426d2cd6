use image::{Rgba, RgbaImage};
use std::sync::Arc;

use crate::render::canvas::{Canvas, Rect};
use crate::render::text::{ellipsize, fit_lines, wrap_text, Typeface};

const INK: Rgba<u8> = Rgba([28, 24, 36, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Draws a panel from its text alone. No I/O, so it can always stand in for a generator.
pub struct PlaceholderRenderer {
    typeface: Arc<Typeface>,
}

impl PlaceholderRenderer {
    pub fn new(typeface: Arc<Typeface>) -> Self {
        Self { typeface }
    }

    /// Same inputs always give the same pixels.
    pub fn render(&self, panel_text: &str, index: u32, style: &str, size: (u32, u32)) -> RgbaImage {
        let (width, height) = (size.0.max(1), size.1.max(1));
        let unit = width.min(height) as f32 / 1024.0;
        let (top, bottom) = style_palette(style);

        let mut canvas = Canvas::new(width, height, bottom);
        canvas.fill_gradient(canvas.bounds(), top, bottom, true);

        let margin = (24.0 * unit).round() as u32;
        let frame = canvas.bounds().inset(margin);
        canvas.stroke_rect(frame, INK, (8.0 * unit).max(1.0));

        // Numbered badge in the top-left corner of the frame.
        let radius = 44.0 * unit;
        let badge_cx = frame.x as f32 + radius + 28.0 * unit;
        let badge_cy = frame.y as f32 + radius + 28.0 * unit;
        canvas.fill_circle(badge_cx, badge_cy, radius, PAPER);
        canvas.stroke_circle(badge_cx, badge_cy, radius, INK, (4.0 * unit).max(1.0));
        let badge_px = 44.0 * unit;
        let number = index.to_string();
        let number_y = badge_cy - self.typeface.line_height(badge_px) / 2.0;
        self.typeface
            .draw_centered(&mut canvas, &number, badge_cx, number_y, badge_px, INK);

        // Style label beside the badge.
        let label_px = 36.0 * unit;
        let label_x = badge_cx + radius + 24.0 * unit;
        let label_width = frame.right() as f32 - label_x - 28.0 * unit;
        let label = ellipsize_if_needed(&self.typeface, style, label_px, label_width);
        let label_y = badge_cy - self.typeface.line_height(label_px) / 2.0;
        self.typeface.draw(&mut canvas, &label, label_x, label_y, label_px, INK);

        // Scene text fills the rest of the frame.
        let text_px = 40.0 * unit;
        let text_area = Rect::new(
            frame.x,
            (badge_cy + radius) as u32,
            frame.width,
            frame.bottom().saturating_sub((badge_cy + radius) as u32),
        )
        .inset((40.0 * unit).round() as u32);
        let line_height = self.typeface.line_height(text_px);
        let max_lines = (text_area.height as f32 / line_height).floor() as usize;
        let wrapped = wrap_text(&self.typeface, panel_text, text_px, text_area.width as f32);
        let (lines, _) = fit_lines(
            &self.typeface,
            wrapped,
            max_lines,
            text_px,
            text_area.width as f32,
        );

        let block_height = lines.len() as f32 * line_height;
        let mut y = text_area.y as f32 + (text_area.height as f32 - block_height).max(0.0) / 2.0;
        for line in &lines {
            self.typeface
                .draw_centered(&mut canvas, line, text_area.center_x(), y, text_px, INK);
            y += line_height;
        }

        canvas.into_image()
    }
}

fn ellipsize_if_needed(face: &Typeface, text: &str, px: f32, max_width: f32) -> String {
    if face.measure(text, px) <= max_width {
        text.to_string()
    } else {
        ellipsize(face, text, px, max_width)
    }
}

/// Gradient endpoints picked from a stable hash of the style name.
fn style_palette(style: &str) -> (Rgba<u8>, Rgba<u8>) {
    // FNV-1a, stable across runs and platforms.
    let hash = style
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3));
    let hue = (hash % 360) as f32;
    (hsv(hue, 0.22, 0.98), hsv(hue, 0.48, 0.82))
}

fn hsv(hue: f32, saturation: f32, value: f32) -> Rgba<u8> {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba([to_u8(r), to_u8(g), to_u8(b), 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PlaceholderRenderer {
        PlaceholderRenderer::new(Arc::new(Typeface::builtin()))
    }

    #[test]
    fn test_render_is_deterministic() {
        let r = renderer();
        let a = r.render("A quiet harbor at dawn", 2, "Noir Ink", (320, 400));
        let b = r.render("A quiet harbor at dawn", 2, "Noir Ink", (320, 400));
        assert_eq!(a.dimensions(), (320, 400));
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_style_changes_palette() {
        let r = renderer();
        let a = r.render("", 1, "Noir Ink", (200, 200));
        let b = r.render("", 1, "Mystical Watercolor", (200, 200));
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_frame_and_text_are_drawn() {
        let r = renderer();
        let img = r.render("dragons everywhere in the sky", 3, "Pop", (512, 512));
        assert_eq!(*img.get_pixel(14, 256), INK);
        let ink = img.pixels().filter(|p| **p == INK).count();
        // More ink than the frame alone accounts for.
        assert!(ink > 4 * 512 * 4);
    }

    #[test]
    fn test_degenerate_sizes_do_not_panic() {
        let r = renderer();
        let long = "word ".repeat(500);
        assert_eq!(r.render(&long, 99, &long, (1, 1)).dimensions(), (1, 1));
        assert_eq!(r.render(&long, 1, "s", (0, 40)).dimensions(), (1, 40));
        assert_eq!(r.render(&long, 1, "s", (64, 64)).dimensions(), (64, 64));
    }

    #[test]
    fn test_hsv_primary_hues() {
        assert_eq!(hsv(0.0, 1.0, 1.0), Rgba([255, 0, 0, 255]));
        assert_eq!(hsv(120.0, 1.0, 1.0), Rgba([0, 255, 0, 255]));
        assert_eq!(hsv(240.0, 1.0, 1.0), Rgba([0, 0, 255, 255]));
    }
}
