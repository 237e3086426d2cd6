//! Panel placement and compositing of the final comic page.
//!
//! [`plan`] is a pure function of aspect ratio and panel count. [`LayoutEngine`] paints
//! a [`Comic`] onto that plan and encodes the result.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use log::{debug, info};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

use crate::core::model::{AspectRatio, Comic, CompositeImage, EncodedFormat, ResolvedPanel};
use crate::render::bubble::{BubbleLayout, SpeechBubbleRenderer};
use crate::render::canvas::{Canvas, Rect};
use crate::render::text::{ellipsize, fit_lines, wrap_text, Typeface};
use crate::utils::compress::{ByteBudgetCompressor, CompressionSettings};

pub const TITLE_BAR_HEIGHT: u32 = 100;
/// Smallest cell edge still worth drawing a panel into.
pub const MIN_CELL: u32 = 48;

const PAGE: Rgba<u8> = Rgba([250, 247, 240, 255]);
const PANEL_BG: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([24, 22, 30, 255]);
const TITLE_FROM: Rgba<u8> = Rgba([46, 32, 84, 255]);
const TITLE_TO: Rgba<u8> = Rgba([92, 54, 140, 255]);
const TITLE_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BADGE: Rgba<u8> = Rgba([214, 64, 69, 255]);

const TITLE_PX: f32 = 44.0;
const BADGE_RADIUS: f32 = 24.0;
const BADGE_PX: f32 = 26.0;
/// Gap between the badge and the panel content edge.
const BADGE_INSET: f32 = 4.0;
/// Below this radius the badge is drawn without its number.
const BADGE_MIN_LABELED: f32 = 8.0;
const SCENE_PX: f32 = 26.0;
const BORDER: f32 = 4.0;
/// Space between the panel border and its content.
const PADDING: u32 = 10;
/// Horizontal room kept free on each side of a bubble.
const BUBBLE_MARGIN: u32 = 12;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("A comic needs at least one panel")]
    NoPanels,
    #[error("{count} panels do not fit on the page, at most {max} do")]
    TooManyPanels { count: usize, max: usize },
    #[error("Panel indices must run from 1 without gaps or duplicates")]
    NonContiguousIndices,
    #[error("Failed to encode composite: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// One full-width row per panel, used for up to three panels.
    SingleColumn,
    Grid { cols: u32, rows: u32 },
    /// One full-width band per panel on tall pages.
    VerticalStrip,
}

impl LayoutMode {
    pub fn gutter(self) -> u32 {
        match self {
            LayoutMode::VerticalStrip => 8,
            _ => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub mode: LayoutMode,
    pub width: u32,
    pub height: u32,
    pub title_bar: Rect,
    /// Cells in panel order. Together they cover the content area exactly.
    pub cells: Vec<Rect>,
}

impl LayoutPlan {
    /// Cell minus the gutter, where the panel border is drawn.
    pub fn frame(&self, index: usize) -> Option<Rect> {
        self.cells
            .get(index)
            .map(|cell| cell.inset(self.mode.gutter() / 2))
    }

    pub fn content_area(&self) -> Rect {
        Rect::new(
            0,
            self.title_bar.bottom(),
            self.width,
            self.height - self.title_bar.bottom(),
        )
    }
}

pub fn select_mode(aspect: AspectRatio, count: usize) -> LayoutMode {
    if count <= 3 {
        LayoutMode::SingleColumn
    } else if aspect.is_tall() {
        LayoutMode::VerticalStrip
    } else {
        let cols = (count as f64).sqrt().ceil() as u32;
        let rows = (count as u32).div_ceil(cols);
        LayoutMode::Grid { cols, rows }
    }
}

/// Splits `len` pixels from `start` into `n` runs, the first `len % n` one pixel longer.
fn split(start: u32, len: u32, n: u32) -> Vec<(u32, u32)> {
    let base = len / n;
    let extra = len % n;
    let mut pos = start;
    (0..n)
        .map(|i| {
            let size = base + u32::from(i < extra);
            let run = (pos, size);
            pos += size;
            run
        })
        .collect()
}

fn cells_for(aspect: AspectRatio, count: usize) -> (LayoutMode, Vec<Rect>) {
    let (width, height) = aspect.canvas_size();
    let top = TITLE_BAR_HEIGHT;
    let content_height = height - TITLE_BAR_HEIGHT;
    let mode = select_mode(aspect, count);

    let cells = match mode {
        LayoutMode::SingleColumn | LayoutMode::VerticalStrip => split(top, content_height, count as u32)
            .into_iter()
            .map(|(y, h)| Rect::new(0, y, width, h))
            .collect(),
        LayoutMode::Grid { cols, rows } => {
            let mut cells = Vec::with_capacity(count);
            for (row, (y, h)) in split(top, content_height, rows).into_iter().enumerate() {
                let placed = row as u32 * cols;
                let in_row = (count as u32 - placed).min(cols);
                for (x, w) in split(0, width, in_row) {
                    cells.push(Rect::new(x, y, w, h));
                }
            }
            cells
        }
    };
    (mode, cells)
}

/// Largest panel count whose cells all stay at least [`MIN_CELL`] on each edge.
pub fn max_panels(aspect: AspectRatio) -> usize {
    let (width, height) = aspect.canvas_size();
    let upper = ((width / MIN_CELL) * ((height - TITLE_BAR_HEIGHT) / MIN_CELL)).max(1) as usize;
    (1..=upper)
        .take_while(|&n| {
            cells_for(aspect, n)
                .1
                .iter()
                .all(|c| c.width >= MIN_CELL && c.height >= MIN_CELL)
        })
        .last()
        .unwrap_or(1)
}

/// Where every element goes for `count` panels on an `aspect` page.
pub fn plan(aspect: AspectRatio, count: usize) -> Result<LayoutPlan, LayoutError> {
    if count == 0 {
        return Err(LayoutError::NoPanels);
    }
    let (width, height) = aspect.canvas_size();
    let (mode, cells) = cells_for(aspect, count);
    if cells
        .iter()
        .any(|c| c.width < MIN_CELL || c.height < MIN_CELL)
    {
        return Err(LayoutError::TooManyPanels {
            count,
            max: max_panels(aspect),
        });
    }

    Ok(LayoutPlan {
        mode,
        width,
        height,
        title_bar: Rect::new(0, 0, width, TITLE_BAR_HEIGHT),
        cells,
    })
}

/// What got drawn where for one panel.
#[derive(Debug, Clone, PartialEq)]
struct PanelPlacement {
    frame: Rect,
    image: Option<Rect>,
    badge: Option<Rect>,
    bubble: Option<Rect>,
    bubble_max_width: f32,
    scene_lines: usize,
}

pub struct LayoutEngine {
    typeface: Arc<Typeface>,
    bubbles: SpeechBubbleRenderer,
    compressor: ByteBudgetCompressor,
    output_max_bytes: usize,
}

impl LayoutEngine {
    pub fn new(typeface: Arc<Typeface>, output_max_bytes: usize) -> Self {
        Self {
            bubbles: SpeechBubbleRenderer::new(typeface.clone()),
            // Full canvas size only, so the encoded page matches the reported dimensions.
            compressor: ByteBudgetCompressor::new(CompressionSettings {
                max_bytes: output_max_bytes,
                min_quality: 40,
                downscale_factor: 1.0,
                ..CompressionSettings::default()
            }),
            typeface,
            output_max_bytes,
        }
    }

    /// Paints the comic and encodes it as PNG, falling back to budgeted JPEG when the
    /// PNG is larger than the output limit.
    pub fn compose(&self, comic: &Comic) -> Result<CompositeImage, LayoutError> {
        let layout = plan(comic.aspect_ratio, comic.panels().len())?;
        let (raster, _) = self.paint(comic, &layout);

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(raster.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let (format, bytes, within_budget) = if png.len() <= self.output_max_bytes {
            (EncodedFormat::Png, png, true)
        } else {
            debug!(
                "Composite PNG is {} bytes, over {}; re-encoding as JPEG",
                png.len(),
                self.output_max_bytes
            );
            let compressed = self
                .compressor
                .compress(&DynamicImage::ImageRgba8(raster.clone()))?;
            (EncodedFormat::Jpeg, compressed.bytes, compressed.within_budget)
        };

        info!(
            "Composed \"{}\": {} panels, {:?}, {}x{}, {} bytes",
            comic.title,
            comic.panels().len(),
            layout.mode,
            layout.width,
            layout.height,
            bytes.len()
        );

        Ok(CompositeImage {
            width: layout.width,
            height: layout.height,
            raster,
            format,
            bytes,
            within_budget,
        })
    }

    fn paint(&self, comic: &Comic, layout: &LayoutPlan) -> (RgbaImage, Vec<PanelPlacement>) {
        let mut canvas = Canvas::new(layout.width, layout.height, PAGE);
        self.draw_title(&mut canvas, &comic.title, layout.title_bar);

        let placements = comic
            .panels()
            .iter()
            .enumerate()
            .filter_map(|(i, panel)| {
                layout
                    .frame(i)
                    .map(|frame| self.draw_panel(&mut canvas, panel, frame))
            })
            .collect();

        (canvas.into_image(), placements)
    }

    fn draw_title(&self, canvas: &mut Canvas, title: &str, bar: Rect) {
        canvas.fill_gradient(bar, TITLE_FROM, TITLE_TO, true);
        let max_width = bar.width.saturating_sub(80) as f32;
        let text = if self.typeface.measure(title, TITLE_PX) > max_width {
            ellipsize(&self.typeface, title, TITLE_PX, max_width)
        } else {
            title.to_string()
        };
        let y = bar.y as f32 + (bar.height as f32 - self.typeface.line_height(TITLE_PX)) / 2.0;
        self.typeface
            .draw_centered(canvas, &text, bar.center_x(), y, TITLE_PX, TITLE_TEXT);
    }

    fn draw_panel(&self, canvas: &mut Canvas, panel: &ResolvedPanel, frame: Rect) -> PanelPlacement {
        canvas.fill_rect(frame, PANEL_BG);
        let inner = frame.inset(BORDER as u32 + PADDING);

        let image = panel
            .image
            .as_ref()
            .map(|img| canvas.draw_image_contain(&img.raster, inner));

        canvas.stroke_rect(frame, INK, BORDER);

        let badge = self.draw_badge(canvas, panel.index(), inner);

        let bubble_max_width = inner.width.saturating_sub(2 * BUBBLE_MARGIN) as f32;
        let bubble_x = (inner.x + BUBBLE_MARGIN) as f32;
        let below_badge = badge.map_or(inner.y, |b| b.bottom() + 8);

        let mut placement = PanelPlacement {
            frame,
            image,
            badge,
            bubble: None,
            bubble_max_width,
            scene_lines: 0,
        };

        match image {
            Some(area) => {
                // Anchored to the bottom of the picture, never taller than half of it.
                let max_height = area.height as f32 / 2.0;
                if let Some(bubble) =
                    self.bubbles
                        .layout(&panel.descriptor.dialogue, bubble_max_width, Some(max_height))
                {
                    let used = bubble.occupied_height();
                    let top = area.bottom().saturating_sub(used + PADDING).max(area.y);
                    self.bubbles
                        .draw_layout(canvas, &bubble, (bubble_x, top as f32), bubble_max_width);
                    placement.bubble = Some(bubble_rect(bubble_x, top, bubble_max_width, &bubble));
                }
            }
            None => {
                // No picture: bubble near the top, scene text underneath.
                let mut cursor = below_badge.max(inner.y);
                let room = inner.bottom().saturating_sub(cursor) as f32;
                if let Some(bubble) =
                    self.bubbles
                        .layout(&panel.descriptor.dialogue, bubble_max_width, Some(room / 2.0))
                {
                    let used = self.bubbles.draw_layout(
                        canvas,
                        &bubble,
                        (bubble_x, cursor as f32),
                        bubble_max_width,
                    );
                    placement.bubble = Some(bubble_rect(bubble_x, cursor, bubble_max_width, &bubble));
                    cursor += used + PADDING;
                }
                placement.scene_lines = self.draw_scene_text(canvas, &panel.descriptor.scene, inner, cursor);
            }
        }

        placement
    }

    /// Numbered disc over the top-left corner of the panel content, shrunk on small panels.
    fn draw_badge(&self, canvas: &mut Canvas, index: u32, inner: Rect) -> Option<Rect> {
        let (cx, cy, radius) = badge_geometry(inner)?;
        canvas.fill_circle(cx, cy, radius, BADGE);
        canvas.stroke_circle(cx, cy, radius, INK, 2.0);

        if radius >= BADGE_MIN_LABELED {
            let px = BADGE_PX * radius / BADGE_RADIUS;
            let number_y = cy - self.typeface.line_height(px) / 2.0;
            self.typeface
                .draw_centered(canvas, &index.to_string(), cx, number_y, px, TITLE_TEXT);
        }

        let left = (cx - radius).floor() as u32;
        let top = (cy - radius).floor() as u32;
        let side = (2.0 * radius).ceil() as u32;
        Some(Rect::new(left, top, side, side))
    }

    fn draw_scene_text(&self, canvas: &mut Canvas, scene: &str, inner: Rect, top: u32) -> usize {
        let max_width = inner.width.saturating_sub(2 * BUBBLE_MARGIN) as f32;
        let line_height = self.typeface.line_height(SCENE_PX);
        let room = inner.bottom().saturating_sub(top) as f32;
        let max_lines = (room / line_height).floor() as usize;

        let wrapped = wrap_text(&self.typeface, scene, SCENE_PX, max_width);
        let (lines, _) = fit_lines(&self.typeface, wrapped, max_lines, SCENE_PX, max_width);
        for (i, line) in lines.iter().enumerate() {
            let y = top as f32 + i as f32 * line_height;
            self.typeface
                .draw_centered(canvas, line, inner.center_x(), y, SCENE_PX, INK);
        }
        lines.len()
    }
}

/// Centre and radius of the badge inside `inner`, or `None` when it has no room.
fn badge_geometry(inner: Rect) -> Option<(f32, f32, f32)> {
    let fit = inner.width.min(inner.height) as f32 / 2.0 - BADGE_INSET;
    let radius = BADGE_RADIUS.min(fit);
    if radius < 1.0 {
        return None;
    }
    Some((
        inner.x as f32 + BADGE_INSET + radius,
        inner.y as f32 + BADGE_INSET + radius,
        radius,
    ))
}

fn bubble_rect(band_x: f32, top: u32, band_width: f32, bubble: &BubbleLayout) -> Rect {
    let left = band_x + (band_width - bubble.width).max(0.0) / 2.0;
    Rect::new(
        left.floor() as u32,
        top,
        bubble.width.ceil() as u32,
        bubble.occupied_height(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ImageSource, PanelDescriptor, PanelImage};

    fn engine() -> LayoutEngine {
        LayoutEngine::new(Arc::new(Typeface::builtin()), 4_000_000)
    }

    fn panel(index: u32, dialogue: &str, with_image: bool) -> ResolvedPanel {
        let image = with_image.then(|| PanelImage {
            raster: Arc::new(RgbaImage::from_pixel(90, 120, Rgba([30, 120, 200, 255]))),
            bytes: vec![0xff],
            source: ImageSource::Provider("mock".to_string()),
            within_budget: true,
        });
        ResolvedPanel {
            descriptor: PanelDescriptor::new(index, format!("Scene number {}", index), dialogue),
            image,
        }
    }

    fn comic(aspect: AspectRatio, panels: Vec<ResolvedPanel>) -> Comic {
        Comic::new("Test Comic", "Ink", aspect, panels).unwrap()
    }

    fn comic_with(aspect: AspectRatio, count: u32) -> Comic {
        comic(aspect, (1..=count).map(|i| panel(i, "", false)).collect())
    }

    #[test]
    fn test_mode_selection_is_deterministic() {
        assert_eq!(select_mode(AspectRatio::Landscape16x9, 3), LayoutMode::SingleColumn);
        assert_eq!(select_mode(AspectRatio::Portrait4x5, 5), LayoutMode::VerticalStrip);
        assert_eq!(select_mode(AspectRatio::Story9x16, 4), LayoutMode::VerticalStrip);
        assert_eq!(
            select_mode(AspectRatio::Landscape16x9, 5),
            LayoutMode::Grid { cols: 3, rows: 2 }
        );
        assert_eq!(
            select_mode(AspectRatio::Square, 4),
            LayoutMode::Grid { cols: 2, rows: 2 }
        );
    }

    #[test]
    fn test_single_panel_fills_content_area() {
        let layout = plan(AspectRatio::Portrait4x5, 1).unwrap();
        assert_eq!(layout.cells, vec![Rect::new(0, 100, 1080, 1250)]);
        assert_eq!(layout.content_area(), layout.cells[0]);
        assert_eq!(layout.title_bar, Rect::new(0, 0, 1080, 100));
    }

    #[test]
    fn test_five_tall_panels_form_equal_strip_bands() {
        let layout = plan(AspectRatio::Portrait4x5, 5).unwrap();
        assert_eq!(layout.mode, LayoutMode::VerticalStrip);
        assert_eq!(layout.cells.len(), 5);
        assert!(layout.cells.iter().all(|c| c.height == 250 && c.width == 1080));
        let total: u32 = layout.cells.iter().map(|c| c.height).sum();
        assert_eq!(total, 1350 - TITLE_BAR_HEIGHT);
        for pair in layout.cells.windows(2) {
            assert_eq!(pair[0].bottom(), pair[1].y);
        }
    }

    #[test]
    fn test_grid_covers_content_exactly() {
        for count in 4..=9 {
            let layout = plan(AspectRatio::Landscape16x9, count).unwrap();
            assert_eq!(layout.cells.len(), count);
            let area: u64 = layout
                .cells
                .iter()
                .map(|c| c.width as u64 * c.height as u64)
                .sum();
            let content = layout.content_area();
            assert_eq!(area, content.width as u64 * content.height as u64);
            assert!(layout.cells.iter().all(|c| content.contains(c)));
        }
        // Five panels: three on top, the last two stretch across the row.
        let layout = plan(AspectRatio::Landscape16x9, 5).unwrap();
        assert_eq!(layout.cells[3].width, 960);
        assert_eq!(layout.cells[4].right(), 1920);
    }

    #[test]
    fn test_uneven_split_gives_remainder_to_first_bands() {
        // 1080 - 100 = 980 over 3 rows.
        let layout = plan(AspectRatio::Square, 3).unwrap();
        let heights: Vec<u32> = layout.cells.iter().map(|c| c.height).collect();
        assert_eq!(heights, vec![327, 327, 326]);
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(plan(AspectRatio::Square, 0), Err(LayoutError::NoPanels)));
        let max = max_panels(AspectRatio::Portrait4x5);
        assert_eq!(max, 1250 / MIN_CELL as usize);
        assert!(plan(AspectRatio::Portrait4x5, max).is_ok());
        match plan(AspectRatio::Portrait4x5, max + 1) {
            Err(LayoutError::TooManyPanels { count, max: reported }) => {
                assert_eq!(count, max + 1);
                assert_eq!(reported, max);
            }
            other => panic!("unexpected {:?}", other.map(|p| p.mode)),
        }
    }

    #[test]
    fn test_scenario_single_panel_with_dialogue() {
        let engine = engine();
        let comic = comic(AspectRatio::Portrait4x5, vec![panel(1, "Hello", true)]);
        let layout = plan(comic.aspect_ratio, 1).unwrap();
        let (raster, placements) = engine.paint(&comic, &layout);

        assert_eq!(raster.dimensions(), (1080, 1350));
        assert_eq!(placements.len(), 1);
        let p = &placements[0];
        assert_eq!(p.frame, Rect::new(8, 108, 1064, 1234));
        let image = p.image.unwrap();
        assert!(p.frame.contains(&image));
        let bubble = p.bubble.unwrap();
        assert!(bubble.bottom() <= image.bottom());
        assert!(bubble.y >= image.y);
    }

    #[test]
    fn test_scenario_missing_image_with_long_dialogue() {
        let engine = engine();
        let dialogue = "Listen closely ".repeat(20);
        assert!(dialogue.trim().len() >= 299);
        let comic = comic(AspectRatio::Portrait4x5, vec![panel(1, &dialogue, false)]);
        let layout = plan(comic.aspect_ratio, 1).unwrap();
        let (_, placements) = engine.paint(&comic, &layout);

        let p = &placements[0];
        assert!(p.image.is_none());
        let bubble = p.bubble.unwrap();
        assert!(bubble.width as f32 <= p.bubble_max_width);
        assert!(bubble.height > 2 * 33);
        assert!(p.scene_lines >= 1);
        assert!(p.frame.contains(&bubble));
    }

    #[test]
    fn test_compose_is_deterministic_and_png_encoded() {
        let engine = engine();
        let panels = || (1..=5).map(|i| panel(i, "Hi", i % 2 == 0)).collect::<Vec<_>>();
        let a = engine.compose(&comic(AspectRatio::Landscape16x9, panels())).unwrap();
        let b = engine.compose(&comic(AspectRatio::Landscape16x9, panels())).unwrap();

        assert_eq!((a.width, a.height), (1920, 1080));
        assert_eq!(a.format, EncodedFormat::Png);
        assert!(a.within_budget);
        assert_eq!(a.bytes, b.bytes);

        let decoded = image::load_from_memory(&a.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), a.raster.as_raw());
    }

    #[test]
    fn test_compose_switches_to_jpeg_over_budget() {
        let engine = LayoutEngine::new(Arc::new(Typeface::builtin()), 1_000);
        let composite = engine
            .compose(&comic(AspectRatio::Square, vec![panel(1, "Hello", true)]))
            .unwrap();
        assert_eq!(composite.format, EncodedFormat::Jpeg);
        assert!(!composite.within_budget);
        assert_eq!((composite.width, composite.height), (1080, 1080));
        let decoded = image::load_from_memory(&composite.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1080, 1080));
        assert_eq!(composite.raster.dimensions(), (1080, 1080));
    }

    #[test]
    fn test_badges_stay_inside_their_panels_at_capacity() {
        let engine = engine();
        let aspect = AspectRatio::Portrait4x5;
        let count = max_panels(aspect);
        let comic = comic_with(aspect, count as u32);
        let layout = plan(aspect, count).unwrap();
        let (_, placements) = engine.paint(&comic, &layout);

        assert_eq!(placements.len(), count);
        for p in &placements {
            let inner = p.frame.inset(BORDER as u32 + PADDING);
            let badge = p.badge.expect("small panels still get a badge");
            assert!(inner.contains(&badge), "{:?} spills out of {:?}", badge, inner);
            assert!(badge.width < 2 * BADGE_RADIUS as u32);
        }

        let single = plan(aspect, 1).unwrap();
        let (_, placements) = engine.paint(&comic_with(aspect, 1), &single);
        assert_eq!(placements[0].badge.map(|b| b.width), Some(2 * BADGE_RADIUS as u32));
    }

    #[test]
    fn test_title_bar_is_painted_first() {
        let engine = engine();
        let comic = comic(AspectRatio::Square, vec![panel(1, "", false)]);
        let layout = plan(comic.aspect_ratio, 1).unwrap();
        let (raster, _) = engine.paint(&comic, &layout);
        assert_ne!(*raster.get_pixel(2, 2), PAGE);
        assert_eq!(*raster.get_pixel(2, 104), PAGE);
    }
}
