use image::Rgba;
use std::sync::Arc;

use crate::render::canvas::Canvas;
use crate::render::text::{fit_lines, wrap_text, Typeface};

#[derive(Debug, Clone)]
pub struct BubbleStyle {
    pub font_px: f32,
    pub padding: f32,
    /// Height of the tail below the ellipse.
    pub tail: f32,
    pub outline_width: f32,
    pub fill: Rgba<u8>,
    pub outline: Rgba<u8>,
    pub text: Rgba<u8>,
}

impl Default for BubbleStyle {
    fn default() -> Self {
        Self {
            font_px: 26.0,
            padding: 18.0,
            tail: 22.0,
            outline_width: 3.0,
            fill: Rgba([255, 255, 255, 255]),
            outline: Rgba([20, 20, 20, 255]),
            text: Rgba([20, 20, 20, 255]),
        }
    }
}

/// Wrapped dialogue and the box it needs, computed before drawing so callers can place it.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleLayout {
    pub lines: Vec<String>,
    pub line_height: f32,
    pub width: f32,
    /// `lines × line_height + 2 × padding`.
    pub height: f32,
    pub tail: f32,
    /// Dialogue did not fit and was cut with an ellipsis.
    pub truncated: bool,
}

impl BubbleLayout {
    pub fn occupied_height(&self) -> u32 {
        (self.height + self.tail).ceil() as u32
    }
}

pub struct SpeechBubbleRenderer {
    typeface: Arc<Typeface>,
    style: BubbleStyle,
}

impl SpeechBubbleRenderer {
    pub fn new(typeface: Arc<Typeface>) -> Self {
        Self::with_style(typeface, BubbleStyle::default())
    }

    pub fn with_style(typeface: Arc<Typeface>, style: BubbleStyle) -> Self {
        Self { typeface, style }
    }

    /// Wraps `text` for a bubble no wider than `max_width` and, when given, no taller than
    /// `max_height` including the tail. `None` when there is nothing to draw or no line fits.
    pub fn layout(&self, text: &str, max_width: f32, max_height: Option<f32>) -> Option<BubbleLayout> {
        let s = &self.style;
        let wrap_width = max_width - 2.0 * s.padding;
        if text.trim().is_empty() || wrap_width <= 0.0 {
            return None;
        }

        let line_height = self.typeface.line_height(s.font_px);
        let lines = wrap_text(&self.typeface, text, s.font_px, wrap_width);

        let max_lines = match max_height {
            Some(h) => ((h - 2.0 * s.padding - s.tail) / line_height).floor().max(0.0) as usize,
            None => usize::MAX,
        };
        if max_lines == 0 {
            return None;
        }
        let (lines, truncated) = fit_lines(&self.typeface, lines, max_lines, s.font_px, wrap_width);
        if lines.is_empty() {
            return None;
        }

        let text_width = lines
            .iter()
            .map(|l| self.typeface.measure(l, s.font_px))
            .fold(0.0_f32, f32::max);
        let width = (text_width + 2.0 * s.padding).min(max_width);
        let height = lines.len() as f32 * line_height + 2.0 * s.padding;

        Some(BubbleLayout {
            lines,
            line_height,
            width,
            height,
            tail: s.tail,
            truncated,
        })
    }

    /// Draws a prepared bubble centered in the `max_width` band starting at `anchor`
    /// (top-left). Returns the vertical space used, tail included.
    pub fn draw_layout(
        &self,
        canvas: &mut Canvas,
        layout: &BubbleLayout,
        anchor: (f32, f32),
        max_width: f32,
    ) -> u32 {
        let s = &self.style;
        let left = anchor.0 + (max_width - layout.width).max(0.0) / 2.0;
        let top = anchor.1;
        let bottom = top + layout.height;
        let cx = left + layout.width / 2.0;

        canvas.fill_ellipse(left, top, layout.width, layout.height, s.fill);
        canvas.stroke_ellipse(left, top, layout.width, layout.height, s.outline, s.outline_width);

        // Tail sits right of center and leans back toward the speaker.
        let base_x = cx + layout.width * 0.12;
        let half_base = (layout.tail * 0.6).min(layout.width / 4.0);
        let base_y = bottom - s.outline_width * 2.0;
        let tip = (base_x - half_base * 1.4, bottom + layout.tail);
        let base_left = (base_x - half_base, base_y);
        let base_right = (base_x + half_base, base_y);
        canvas.fill_polygon(&[base_left, base_right, tip], s.fill);
        canvas.stroke_polyline(&[base_left, tip, base_right], s.outline, s.outline_width);

        for (i, line) in layout.lines.iter().enumerate() {
            let y = top + s.padding + i as f32 * layout.line_height;
            self.typeface.draw_centered(canvas, line, cx, y, s.font_px, s.text);
        }

        layout.occupied_height()
    }

    /// Wraps and draws `text` at `anchor` in one step. Returns 0 when nothing was drawn.
    pub fn draw(&self, canvas: &mut Canvas, text: &str, anchor: (f32, f32), max_width: f32) -> u32 {
        match self.layout(text, max_width, None) {
            Some(layout) => self.draw_layout(canvas, &layout, anchor, max_width),
            None => 0,
        }
    }
}
