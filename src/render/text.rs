//! Text measurement, drawing and greedy word wrapping.
//!
//! A [`Typeface`] is either an outline font rasterized with rusttype, or the built-in
//! 8×8 bitmap font. The bitmap face needs no font files, so placeholder panels can
//! always be rendered.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::Rgba;
use log::{info, warn};
use rusttype::{point, Font, Scale};

use crate::render::canvas::Canvas;

const ELLIPSIS: &str = "...";

pub struct Typeface {
    outline: Option<Font<'static>>,
}

impl std::fmt::Debug for Typeface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Typeface")
            .field("outline", &self.outline.is_some())
            .finish()
    }
}

impl Typeface {
    /// The bitmap face. Deterministic metrics, no I/O.
    pub fn builtin() -> Self {
        Self { outline: None }
    }

    pub fn from_bytes(data: Vec<u8>) -> anyhow::Result<Self> {
        let font = Font::try_from_vec(data)
            .ok_or_else(|| anyhow::anyhow!("Font data could not be parsed"))?;
        Ok(Self {
            outline: Some(font),
        })
    }

    /// Explicit font file first, then a system family lookup, then the bitmap face.
    pub fn load(font_path: Option<&str>, family: Option<&str>) -> Self {
        if let Some(path) = font_path {
            match std::fs::read(path).map_err(anyhow::Error::from).and_then(Self::from_bytes) {
                Ok(face) => {
                    info!("Loaded font from {}", path);
                    return face;
                }
                Err(e) => warn!("Font file {} unusable: {:#}", path, e),
            }
        }

        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let families = match family {
            Some(name) => vec![fontdb::Family::Name(name), fontdb::Family::SansSerif],
            None => vec![fontdb::Family::SansSerif],
        };
        let query = fontdb::Query {
            families: &families,
            weight: fontdb::Weight::BOLD,
            ..fontdb::Query::default()
        };

        let data = db
            .query(&query)
            .and_then(|id| db.with_face_data(id, |data, _index| data.to_vec()));
        match data.map(Self::from_bytes) {
            Some(Ok(face)) => face,
            Some(Err(e)) => {
                warn!("System font unusable, falling back to bitmap font: {:#}", e);
                Self::builtin()
            }
            None => {
                warn!("No system font found, falling back to bitmap font");
                Self::builtin()
            }
        }
    }

    pub fn is_bitmap(&self) -> bool {
        self.outline.is_none()
    }

    fn bitmap_scale(px: f32) -> u32 {
        ((px / 10.0).round() as u32).max(1)
    }

    /// Vertical distance between consecutive baselines.
    pub fn line_height(&self, px: f32) -> f32 {
        match &self.outline {
            Some(font) => {
                let v = font.v_metrics(Scale::uniform(px));
                (v.ascent - v.descent + v.line_gap).ceil()
            }
            None => (Self::bitmap_scale(px) * 11) as f32,
        }
    }

    /// Rendered width of a single line.
    pub fn measure(&self, text: &str, px: f32) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        match &self.outline {
            Some(font) => {
                let scale = Scale::uniform(px);
                font.layout(text, scale, point(0.0, 0.0))
                    .last()
                    .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                    .unwrap_or(0.0)
                    .ceil()
            }
            None => (text.chars().count() as u32 * 8 * Self::bitmap_scale(px)) as f32,
        }
    }

    /// Draws one line with its top edge at `y`.
    pub fn draw(&self, canvas: &mut Canvas, text: &str, x: f32, y: f32, px: f32, color: Rgba<u8>) {
        match &self.outline {
            Some(font) => {
                let scale = Scale::uniform(px);
                let v = font.v_metrics(scale);
                for glyph in font.layout(text, scale, point(x, y + v.ascent)) {
                    if let Some(bb) = glyph.pixel_bounding_box() {
                        glyph.draw(|gx, gy, coverage| {
                            canvas.blend_pixel(bb.min.x + gx as i32, bb.min.y + gy as i32, color, coverage);
                        });
                    }
                }
            }
            None => {
                let s = Self::bitmap_scale(px) as i32;
                let mut pen_x = x.round() as i32;
                let top = y.round() as i32 + s;
                for ch in text.chars() {
                    let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
                    if let Some(rows) = glyph {
                        for (row, bits) in rows.iter().enumerate() {
                            for col in 0..8 {
                                if bits & (1u8 << col) == 0 {
                                    continue;
                                }
                                for dy in 0..s {
                                    for dx in 0..s {
                                        canvas.blend_pixel(
                                            pen_x + col * s + dx,
                                            top + row as i32 * s + dy,
                                            color,
                                            1.0,
                                        );
                                    }
                                }
                            }
                        }
                    }
                    pen_x += 8 * s;
                }
            }
        }
    }

    /// Draws `text` horizontally centered on `center_x`.
    pub fn draw_centered(
        &self,
        canvas: &mut Canvas,
        text: &str,
        center_x: f32,
        y: f32,
        px: f32,
        color: Rgba<u8>,
    ) {
        let width = self.measure(text, px);
        self.draw(canvas, text, center_x - width / 2.0, y, px, color);
    }
}

/// Greedy word wrap: words join the current line while it still fits in `max_width`.
///
/// A single word wider than `max_width` is split across lines by character.
pub fn wrap_text(face: &Typeface, text: &str, px: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };

        if face.measure(&candidate, px) <= max_width {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }

        if face.measure(word, px) <= max_width {
            current = word.to_string();
        } else {
            let mut pieces = split_long_word(face, word, px, max_width);
            current = pieces.pop().unwrap_or_default();
            lines.extend(pieces);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn split_long_word(face: &Typeface, word: &str, px: f32, max_width: f32) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    for ch in word.chars() {
        piece.push(ch);
        if face.measure(&piece, px) > max_width && piece.chars().count() > 1 {
            piece.pop();
            pieces.push(std::mem::take(&mut piece));
            piece.push(ch);
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

/// Shortens `line` until it plus a trailing ellipsis fits in `max_width`.
pub fn ellipsize(face: &Typeface, line: &str, px: f32, max_width: f32) -> String {
    let mut kept: Vec<char> = line.trim_end().chars().collect();
    loop {
        let head: String = kept.iter().collect();
        let candidate = format!("{}{}", head.trim_end(), ELLIPSIS);
        if face.measure(&candidate, px) <= max_width {
            return candidate;
        }
        if kept.pop().is_none() {
            return String::new();
        }
    }
}

/// Keeps at most `max_lines` lines, ellipsizing the last kept line when anything was cut.
/// Returns the lines and whether truncation happened.
pub fn fit_lines(
    face: &Typeface,
    mut lines: Vec<String>,
    max_lines: usize,
    px: f32,
    max_width: f32,
) -> (Vec<String>, bool) {
    if lines.len() <= max_lines {
        return (lines, false);
    }
    lines.truncate(max_lines);
    if let Some(last) = lines.last_mut() {
        *last = ellipsize(face, last, px, max_width);
    }
    (lines, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_metrics_are_deterministic() {
        let face = Typeface::builtin();
        assert!(face.is_bitmap());
        assert_eq!(face.measure("abc", 20.0), 48.0);
        assert_eq!(face.measure("", 20.0), 0.0);
        assert_eq!(face.line_height(20.0), 22.0);
        assert_eq!(face.measure("x", 4.0), 8.0);
    }

    #[test]
    fn test_wrap_respects_max_width() {
        let face = Typeface::builtin();
        // 16 px per character at 20px.
        let lines = wrap_text(&face, "the quick brown fox jumps over the lazy dog", 20.0, 160.0);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps over", "the lazy", "dog"]);
        for line in &lines {
            assert!(face.measure(line, 20.0) <= 160.0);
        }
    }

    #[test]
    fn test_wrap_splits_words_longer_than_a_line() {
        let face = Typeface::builtin();
        let lines = wrap_text(&face, "abcdefghijkl xy", 20.0, 80.0);
        assert_eq!(lines, vec!["abcde", "fghij", "kl xy"]);
    }

    #[test]
    fn test_wrap_of_blank_text_is_empty() {
        let face = Typeface::builtin();
        assert!(wrap_text(&face, "   \n ", 20.0, 100.0).is_empty());
    }

    #[test]
    fn test_fit_lines_ellipsizes_last_line() {
        let face = Typeface::builtin();
        let lines = vec!["one".to_string(), "two words".to_string(), "three".to_string()];
        let (kept, truncated) = fit_lines(&face, lines, 2, 20.0, 112.0);
        assert!(truncated);
        assert_eq!(kept.len(), 2);
        assert!(kept[1].ends_with("..."));
        assert!(face.measure(&kept[1], 20.0) <= 112.0);
    }

    #[test]
    fn test_bitmap_draw_marks_pixels() {
        let face = Typeface::builtin();
        let mut canvas = Canvas::new(40, 20, Rgba([255, 255, 255, 255]));
        face.draw(&mut canvas, "H", 0.0, 0.0, 10.0, Rgba([0, 0, 0, 255]));
        let dark = canvas.image().pixels().filter(|p| p[0] == 0).count();
        assert!(dark > 0);
    }
}
