use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, RgbImage};
use log::{debug, warn};

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub max_bytes: usize,
    pub start_quality: u8,
    /// Quality floor of each sweep.
    pub min_quality: u8,
    pub quality_step: u8,
    /// Applied once when the first sweep cannot reach the budget. 1.0 keeps the size fixed.
    pub downscale_factor: f32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_bytes: 1_500_000,
            start_quality: 95,
            min_quality: 40,
            quality_step: 5,
            downscale_factor: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// False when even the smallest attempt stayed over `max_bytes`.
    pub within_budget: bool,
}

/// Re-encodes images as JPEG until they fit a byte ceiling.
#[derive(Debug, Clone, Default)]
pub struct ByteBudgetCompressor {
    settings: CompressionSettings,
}

impl ByteBudgetCompressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    pub fn with_budget(max_bytes: usize, min_quality: u8) -> Self {
        Self::new(CompressionSettings {
            max_bytes,
            min_quality,
            ..CompressionSettings::default()
        })
    }

    /// Quality sweep at full size, then one downscale and a second sweep.
    /// Over budget after both, the smallest attempt comes back flagged.
    pub fn compress(&self, image: &DynamicImage) -> Result<Compressed, ImageError> {
        let rgb = image.to_rgb8();
        let mut best = match self.sweep(&rgb)? {
            Sweep::Fits(done) => return Ok(done),
            Sweep::Over(smallest) => smallest,
        };

        let factor = self.settings.downscale_factor.clamp(0.05, 1.0);
        if factor >= 1.0 {
            warn!(
                "Could not compress below {} bytes at this size, keeping {} bytes at quality {}",
                self.settings.max_bytes,
                best.bytes.len(),
                best.quality
            );
            return Ok(best);
        }
        let width = ((rgb.width() as f32 * factor).round() as u32).max(1);
        let height = ((rgb.height() as f32 * factor).round() as u32).max(1);
        debug!(
            "Downscaling {}x{} to {}x{} to reach {} bytes",
            rgb.width(),
            rgb.height(),
            width,
            height,
            self.settings.max_bytes
        );
        let smaller = image::imageops::resize(&rgb, width, height, FilterType::Lanczos3);

        match self.sweep(&smaller)? {
            Sweep::Fits(done) => Ok(done),
            Sweep::Over(smallest) => {
                if smallest.bytes.len() < best.bytes.len() {
                    best = smallest;
                }
                warn!(
                    "Could not compress below {} bytes, keeping best effort of {} bytes at quality {}",
                    self.settings.max_bytes,
                    best.bytes.len(),
                    best.quality
                );
                Ok(best)
            }
        }
    }

    fn sweep(&self, rgb: &RgbImage) -> Result<Sweep, ImageError> {
        let floor = self.settings.min_quality.clamp(1, 100);
        let step = self.settings.quality_step.max(1);
        let mut quality = self.settings.start_quality.clamp(floor, 100);

        let mut smallest = self.attempt(rgb, quality)?;
        if smallest.within_budget {
            return Ok(Sweep::Fits(smallest));
        }
        while quality > floor {
            quality = quality.saturating_sub(step).max(floor);
            let attempt = self.attempt(rgb, quality)?;
            if attempt.within_budget {
                return Ok(Sweep::Fits(attempt));
            }
            if attempt.bytes.len() < smallest.bytes.len() {
                smallest = attempt;
            }
        }
        Ok(Sweep::Over(smallest))
    }

    fn attempt(&self, rgb: &RgbImage, quality: u8) -> Result<Compressed, ImageError> {
        let bytes = encode_jpeg(rgb, quality)?;
        Ok(Compressed {
            within_budget: bytes.len() <= self.settings.max_bytes,
            bytes,
            quality,
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

enum Sweep {
    Fits(Compressed),
    Over(Compressed),
}

pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(rgb)?;
    Ok(out)
}
