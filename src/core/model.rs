use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One panel as produced by the story parser. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    /// 1-based position of the panel inside its comic.
    pub panel: u32,
    pub scene: String,
    #[serde(default)]
    pub dialogue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_actions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

impl PanelDescriptor {
    pub fn new(panel: u32, scene: impl Into<String>, dialogue: impl Into<String>) -> Self {
        Self {
            panel,
            scene: scene.into(),
            dialogue: dialogue.into(),
            character_actions: None,
            mood: None,
        }
    }

    /// Scene, actions and dialogue joined, used for name matching and placeholder text.
    pub fn combined_text(&self) -> String {
        let mut parts = vec![self.scene.as_str()];
        if let Some(actions) = &self.character_actions {
            parts.push(actions.as_str());
        }
        if !self.dialogue.is_empty() {
            parts.push(self.dialogue.as_str());
        }
        parts.join(" ")
    }
}

/// Prompt-conditioning context for a recurring character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterReference {
    pub name: String,
    pub description: String,
    /// Encoded photo, sent to providers that accept a reference when the character is named in a panel.
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
}

/// Enumerated aspect-ratio tags. Each maps to one fixed canvas size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "9:16")]
    Story9x16,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 4] = [
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape16x9,
        AspectRatio::Story9x16,
        AspectRatio::Square,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Story9x16 => "9:16",
            AspectRatio::Square => "1:1",
        }
    }

    /// Size of the final composite.
    pub fn canvas_size(self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait4x5 => (1080, 1350),
            AspectRatio::Landscape16x9 => (1920, 1080),
            AspectRatio::Story9x16 => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
        }
    }

    /// Size requested from generators and used by the placeholder.
    pub fn panel_size(self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait4x5 => (896, 1152),
            AspectRatio::Landscape16x9 => (1344, 768),
            AspectRatio::Story9x16 => (768, 1344),
            AspectRatio::Square => (1024, 1024),
        }
    }

    pub fn is_tall(self) -> bool {
        let (w, h) = self.canvas_size();
        h > w
    }

    pub fn is_wide(self) -> bool {
        let (w, h) = self.canvas_size();
        w > h
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|a| a.tag() == trimmed)
            .ok_or_else(|| anyhow::anyhow!("Unknown aspect ratio: {}", s))
    }
}

/// Which step of the provider chain produced a panel image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ImageSource {
    Provider(String),
    Placeholder,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Provider(name) => write!(f, "{}", name),
            ImageSource::Placeholder => f.write_str("placeholder"),
        }
    }
}

/// A raster resolved for one panel, in both decoded and encoded form.
///
/// `bytes` is what gets persisted and may be a downscaled re-encode of `raster`.
#[derive(Debug, Clone)]
pub struct PanelImage {
    pub raster: Arc<RgbaImage>,
    pub bytes: Vec<u8>,
    pub source: ImageSource,
    pub within_budget: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedPanel {
    pub descriptor: PanelDescriptor,
    /// Always `Some` when produced by the provider chain; layout still copes with `None`.
    pub image: Option<PanelImage>,
}

impl ResolvedPanel {
    pub fn index(&self) -> u32 {
        self.descriptor.panel
    }
}

#[derive(Debug, Clone)]
pub struct Comic {
    pub title: String,
    pub style: String,
    pub aspect_ratio: AspectRatio,
    panels: Vec<ResolvedPanel>,
}

impl Comic {
    /// Builds a comic, ordering panels by index. Indices must run 1..=n without gaps.
    pub fn new(
        title: impl Into<String>,
        style: impl Into<String>,
        aspect_ratio: AspectRatio,
        mut panels: Vec<ResolvedPanel>,
    ) -> Result<Self, crate::render::layout::LayoutError> {
        panels.sort_by_key(|p| p.index());
        let contiguous = panels
            .iter()
            .enumerate()
            .all(|(i, p)| p.index() as usize == i + 1);
        if !contiguous {
            return Err(crate::render::layout::LayoutError::NonContiguousIndices);
        }
        Ok(Self {
            title: title.into(),
            style: style.into(),
            aspect_ratio,
            panels,
        })
    }

    pub fn panels(&self) -> &[ResolvedPanel] {
        &self.panels
    }
}

/// Output encoding of the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    Png,
    Jpeg,
}

impl EncodedFormat {
    pub fn extension(self) -> &'static str {
        match self {
            EncodedFormat::Png => "png",
            EncodedFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompositeImage {
    pub width: u32,
    pub height: u32,
    pub raster: RgbaImage,
    pub format: EncodedFormat,
    pub bytes: Vec<u8>,
    pub within_budget: bool,
}

/// Serialized form handed to persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComicRecord {
    pub title: String,
    pub style: String,
    pub aspect_ratio: AspectRatio,
    pub panels: Vec<PanelRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelRecord {
    #[serde(flatten)]
    pub descriptor: PanelDescriptor,
    pub image_base64: Option<String>,
    pub image_source: Option<ImageSource>,
}

impl ComicRecord {
    pub fn from_comic(comic: &Comic) -> Self {
        use base64::Engine as _;
        let engine = base64::engine::general_purpose::STANDARD;

        let panels = comic
            .panels()
            .iter()
            .map(|p| PanelRecord {
                descriptor: p.descriptor.clone(),
                image_base64: p.image.as_ref().map(|img| engine.encode(&img.bytes)),
                image_source: p.image.as_ref().map(|img| img.source.clone()),
            })
            .collect();

        Self {
            title: comic.title.clone(),
            style: comic.style.clone(),
            aspect_ratio: comic.aspect_ratio,
            panels,
        }
    }
}
