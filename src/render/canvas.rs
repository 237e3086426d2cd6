use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tiny_skia::{
    Color, FillRule, GradientStop, LinearGradient, Paint, Path, PathBuilder, PixmapMut, Point,
    SpreadMode, Stroke, Transform,
};

/// Integer pixel rectangle used by layout code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x as f32 + self.width as f32 / 2.0
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Shrinks every side by `by`, collapsing to zero size rather than underflowing.
    pub fn inset(&self, by: u32) -> Rect {
        let dx = by.min(self.width / 2);
        let dy = by.min(self.height / 2);
        Rect::new(
            self.x + dx,
            self.y + dy,
            self.width - 2 * dx,
            self.height - 2 * dy,
        )
    }

    /// Largest rectangle with the aspect ratio of `width`×`height` that fits inside, centered.
    pub fn contain(&self, width: u32, height: u32) -> Rect {
        if width == 0 || height == 0 || self.width == 0 || self.height == 0 {
            return Rect::new(self.x, self.y, 0, 0);
        }
        let scale = (self.width as f64 / width as f64).min(self.height as f64 / height as f64);
        let w = ((width as f64 * scale).round() as u32).clamp(1, self.width);
        let h = ((height as f64 * scale).round() as u32).clamp(1, self.height);
        Rect::new(
            self.x + (self.width - w) / 2,
            self.y + (self.height - h) / 2,
            w,
            h,
        )
    }

    fn to_skia(self) -> Option<tiny_skia::Rect> {
        tiny_skia::Rect::from_xywh(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

fn paint_for(color: Rgba<u8>) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    paint
}

fn skia_color(color: Rgba<u8>) -> Color {
    Color::from_rgba8(color[0], color[1], color[2], color[3])
}

/// Opaque RGBA drawing surface.
///
/// Pixels stay fully opaque, so the buffer can be handed to tiny-skia (which expects
/// premultiplied data) without conversion.
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: Rgba<u8>) -> Self {
        let bg = Rgba([background[0], background[1], background[2], 255]);
        Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), bg),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width(), self.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn with_pixmap(&mut self, draw: impl FnOnce(&mut PixmapMut<'_>)) {
        let (width, height) = self.image.dimensions();
        if let Some(mut pixmap) = PixmapMut::from_bytes(&mut self.image, width, height) {
            draw(&mut pixmap);
        }
    }

    fn fill(&mut self, path: &Path, color: Rgba<u8>) {
        let paint = paint_for(color);
        self.with_pixmap(|pm| {
            pm.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None)
        });
    }

    fn stroke(&mut self, path: &Path, color: Rgba<u8>, width: f32) {
        let paint = paint_for(color);
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        self.with_pixmap(|pm| pm.stroke_path(path, &paint, &stroke, Transform::identity(), None));
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        if let Some(r) = rect.to_skia() {
            let paint = paint_for(color);
            self.with_pixmap(|pm| pm.fill_rect(r, &paint, Transform::identity(), None));
        }
    }

    /// Border drawn fully inside `rect`.
    pub fn stroke_rect(&mut self, rect: Rect, color: Rgba<u8>, width: f32) {
        let half = width / 2.0;
        let inner = tiny_skia::Rect::from_xywh(
            rect.x as f32 + half,
            rect.y as f32 + half,
            rect.width as f32 - width,
            rect.height as f32 - width,
        );
        if let Some(r) = inner {
            let path = PathBuilder::from_rect(r);
            self.stroke(&path, color, width);
        }
    }

    /// Linear gradient from `from` at the top (or left) edge to `to` at the bottom (or right).
    pub fn fill_gradient(&mut self, rect: Rect, from: Rgba<u8>, to: Rgba<u8>, vertical: bool) {
        let Some(r) = rect.to_skia() else {
            return;
        };
        let start = Point::from_xy(r.left(), r.top());
        let end = if vertical {
            Point::from_xy(r.left(), r.bottom())
        } else {
            Point::from_xy(r.right(), r.top())
        };
        let shader = LinearGradient::new(
            start,
            end,
            vec![
                GradientStop::new(0.0, skia_color(from)),
                GradientStop::new(1.0, skia_color(to)),
            ],
            SpreadMode::Pad,
            Transform::identity(),
        );
        match shader {
            Some(shader) => {
                let mut paint = Paint::default();
                paint.shader = shader;
                self.with_pixmap(|pm| pm.fill_rect(r, &paint, Transform::identity(), None));
            }
            None => self.fill_rect(rect, from),
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
        if let Some(path) = PathBuilder::from_circle(cx, cy, radius) {
            self.fill(&path, color);
        }
    }

    pub fn stroke_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>, width: f32) {
        if let Some(path) = PathBuilder::from_circle(cx, cy, radius) {
            self.stroke(&path, color, width);
        }
    }

    pub fn fill_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba<u8>) {
        if let Some(path) = tiny_skia::Rect::from_xywh(x, y, w, h).and_then(PathBuilder::from_oval) {
            self.fill(&path, color);
        }
    }

    pub fn stroke_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba<u8>, width: f32) {
        if let Some(path) = tiny_skia::Rect::from_xywh(x, y, w, h).and_then(PathBuilder::from_oval) {
            self.stroke(&path, color, width);
        }
    }

    fn polyline(points: &[(f32, f32)], close: bool) -> Option<Path> {
        let (first, rest) = points.split_first()?;
        let mut pb = PathBuilder::new();
        pb.move_to(first.0, first.1);
        for (x, y) in rest {
            pb.line_to(*x, *y);
        }
        if close {
            pb.close();
        }
        pb.finish()
    }

    pub fn fill_polygon(&mut self, points: &[(f32, f32)], color: Rgba<u8>) {
        if let Some(path) = Self::polyline(points, true) {
            self.fill(&path, color);
        }
    }

    pub fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba<u8>, width: f32) {
        if let Some(path) = Self::polyline(points, false) {
            self.stroke(&path, color, width);
        }
    }

    /// Scales `source` to fit `target` without cropping, centers it, and returns where it landed.
    pub fn draw_image_contain(&mut self, source: &RgbaImage, target: Rect) -> Rect {
        let placed = target.contain(source.width(), source.height());
        if placed.width == 0 || placed.height == 0 {
            return placed;
        }
        if placed.width == source.width() && placed.height == source.height() {
            imageops::overlay(&mut self.image, source, placed.x as i64, placed.y as i64);
        } else {
            let resized = imageops::resize(source, placed.width, placed.height, FilterType::Triangle);
            imageops::overlay(&mut self.image, &resized, placed.x as i64, placed.y as i64);
        }
        placed
    }

    /// Source-over blend of a single pixel at `coverage` (0.0..=1.0). Out-of-bounds writes are ignored.
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return;
        }
        let alpha = (coverage.clamp(0.0, 1.0) * color[3] as f32) / 255.0;
        if alpha <= 0.0 {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        for c in 0..3 {
            let d = dst[c] as f32;
            let s = color[c] as f32;
            dst[c] = (d + (s - d) * alpha).round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = 255;
    }
}
