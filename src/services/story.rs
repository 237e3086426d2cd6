use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

use crate::core::model::PanelDescriptor;
use crate::services::llm::{LlmClient, LlmConfig};

const SYSTEM_PROMPT: &str = "You are the storyboard parser of a comic studio. Take the user's story \
and divide it into 3-6 clear panels. Each panel should include: scene description (setting, mood), \
character actions, and dialogue or narration text. Return ONLY a valid JSON array formatted like: \
[{\"panel\": 1, \"scene\": \"...\", \"dialogue\": \"...\", \"character_actions\": \"...\", \"mood\": \"...\"}]. \
Do not include any other text or explanations.";

const FALLBACK_DIALOGUE_CHARS: usize = 200;

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PanelList {
    Bare(Vec<RawPanel>),
    Wrapped { panels: Vec<RawPanel> },
}

#[derive(Deserialize)]
struct RawPanel {
    #[serde(default)]
    panel: Option<u32>,
    #[serde(default)]
    scene: String,
    #[serde(default)]
    dialogue: String,
    #[serde(default)]
    character_actions: Option<String>,
    #[serde(default)]
    mood: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Turns a model reply into panels numbered 1..=n, at most `max_panels` of them.
pub fn parse_panels(response: &str, max_panels: usize) -> Result<Vec<PanelDescriptor>> {
    let clean_json = strip_code_blocks(response);
    let list: PanelList = serde_json::from_str(&clean_json)
        .context(format!("Failed to parse panel JSON: {}", clean_json))?;
    let mut raw = match list {
        PanelList::Bare(panels) => panels,
        PanelList::Wrapped { panels } => panels,
    };

    // Stable, so unnumbered panels keep their reply order after the numbered ones.
    raw.sort_by_key(|p| p.panel.unwrap_or(u32::MAX));

    let panels: Vec<PanelDescriptor> = raw
        .into_iter()
        .filter(|p| !p.scene.trim().is_empty() || !p.dialogue.trim().is_empty())
        .take(max_panels.max(1))
        .enumerate()
        .map(|(i, p)| PanelDescriptor {
            panel: i as u32 + 1,
            scene: p.scene.trim().to_string(),
            dialogue: p.dialogue.trim().to_string(),
            character_actions: non_empty(p.character_actions),
            mood: non_empty(p.mood),
        })
        .collect();

    if panels.is_empty() {
        bail!("Model returned no usable panels");
    }
    Ok(panels)
}

/// Single panel built from the story text itself, used when the model cannot help.
pub fn fallback_panels(story: &str) -> Vec<PanelDescriptor> {
    let story = story.trim();
    let dialogue = if story.chars().count() > FALLBACK_DIALOGUE_CHARS {
        let head: String = story.chars().take(FALLBACK_DIALOGUE_CHARS).collect();
        format!("{}...", head)
    } else {
        story.to_string()
    };

    vec![PanelDescriptor {
        panel: 1,
        scene: "A mystical setting where the story unfolds".to_string(),
        dialogue,
        character_actions: Some("Characters begin their journey".to_string()),
        mood: Some("Mysterious and enchanting".to_string()),
    }]
}

pub struct StoryParser {
    llm: Box<dyn LlmClient>,
    retry_count: usize,
    retry_delay: Duration,
    max_panels: usize,
}

impl StoryParser {
    pub fn new(llm: Box<dyn LlmClient>, config: &LlmConfig, max_panels: usize) -> Self {
        Self {
            llm,
            retry_count: config.retry_count,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            max_panels,
        }
    }

    /// Always yields at least one panel.
    pub async fn parse(&self, story: &str) -> Vec<PanelDescriptor> {
        match self.request_panels(story).await {
            Ok(panels) => {
                info!("Story split into {} panels", panels.len());
                panels
            }
            Err(e) => {
                warn!("Story parsing failed, using single-panel fallback: {:#}", e);
                fallback_panels(story)
            }
        }
    }

    async fn request_panels(&self, story: &str) -> Result<Vec<PanelDescriptor>> {
        let prompt = format!("Parse this story into comic panels: {}", story);
        let attempts = self.retry_count + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match self.llm.chat(SYSTEM_PROMPT, &prompt).await {
                Ok(reply) => parse_panels(&reply, self.max_panels),
                Err(e) => Err(e),
            };
            match result {
                Ok(panels) => return Ok(panels),
                Err(e) => {
                    warn!("Panel request attempt {}/{} failed: {:#}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No panel request was made")))
    }
}
