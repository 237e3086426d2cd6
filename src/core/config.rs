use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::model::AspectRatio;
use crate::services::llm::LlmConfig;
use crate::services::providers::gemini::GeminiImageConfig;
use crate::services::providers::openai::OpenAiImageConfig;
use crate::services::providers::url_template::UrlTemplateConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    pub llm: LlmConfig,

    #[serde(default)]
    pub comic: ComicConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub characters: Vec<CharacterConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComicConfig {
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_max_panels")]
    pub max_panels: usize,
}

impl Default for ComicConfig {
    fn default() -> Self {
        Self {
            style: default_style(),
            aspect_ratio: AspectRatio::default(),
            max_panels: default_max_panels(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    /// Adapters in priority order. The placeholder always runs last and is not listed.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_deadline_seconds")]
    pub deadline_seconds: u64,
    pub seed: Option<u64>,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,

    pub openai: Option<OpenAiImageConfig>,
    pub gemini: Option<GeminiImageConfig>,
    pub url: Option<UrlTemplateConfig>,
}

impl ImageConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, 8)
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            concurrency: default_concurrency(),
            deadline_seconds: default_deadline_seconds(),
            seed: None,
            negative_prompt: default_negative_prompt(),
            max_bytes: default_max_bytes(),
            min_quality: default_min_quality(),
            openai: None,
            gemini: None,
            url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LayoutConfig {
    pub font_family: Option<String>,
    pub font_path: Option<String>,
    #[serde(default = "default_output_max_bytes")]
    pub output_max_bytes: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font_family: None,
            font_path: None,
            output_max_bytes: default_output_max_bytes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CharacterConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub image_path: Option<String>,
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_style() -> String {
    "Mystical Watercolor".to_string()
}
fn default_max_panels() -> usize {
    6
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_concurrency() -> usize {
    3
}
fn default_deadline_seconds() -> u64 {
    300
}
fn default_negative_prompt() -> String {
    "text, letters, watermark, signature, speech bubbles, nudity, sexual content, gore, \
     graphic violence, deformed anatomy, extra limbs, blurry"
        .to_string()
}
fn default_max_bytes() -> usize {
    1_500_000
}
fn default_min_quality() -> u8 {
    40
}
fn default_output_max_bytes() -> usize {
    4_000_000
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml_str(
            r#"
llm:
  provider: ollama
  ollama:
    base_url: http://localhost:11434
    model: llama3
"#,
        )
        .unwrap();

        assert_eq!(config.input_folder, "input");
        assert_eq!(config.comic.style, "Mystical Watercolor");
        assert_eq!(config.comic.aspect_ratio, AspectRatio::Portrait4x5);
        assert!(config.image.providers.is_empty());
        assert_eq!(config.image.timeout_seconds, 60);
        assert_eq!(config.image.effective_concurrency(), 3);
        assert_eq!(config.layout.output_max_bytes, 4_000_000);
        assert!(config.characters.is_empty());
    }

    #[test]
    fn test_full_image_section() {
        let config = Config::from_yaml_str(
            r#"
llm:
  provider: openai
  openai:
    api_key: sk-test
    model: gpt-4o-mini
comic:
  style: Noir Ink
  aspect_ratio: "16:9"
image:
  providers: [openai, url]
  concurrency: 40
  seed: 7
  openai:
    api_key: sk-test
  url:
    template: "https://img.example/{prompt}?w={width}&h={height}&seed={seed}"
characters:
  - name: Jamie
    description: curly red hair, green cloak
"#,
        )
        .unwrap();

        assert_eq!(config.comic.aspect_ratio, AspectRatio::Landscape16x9);
        assert_eq!(config.image.providers, vec!["openai", "url"]);
        assert_eq!(config.image.effective_concurrency(), 8);
        assert_eq!(config.image.seed, Some(7));
        assert!(config.image.url.is_some());
        assert_eq!(config.characters[0].name, "Jamie");
        assert!(config.characters[0].image_path.is_none());
    }

    #[test]
    fn test_unknown_aspect_ratio_is_rejected() {
        let result = Config::from_yaml_str(
            r#"
llm:
  provider: ollama
comic:
  aspect_ratio: "3:2"
"#,
        );
        assert!(result.is_err());
    }
}
