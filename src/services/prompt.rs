use crate::core::model::{CharacterReference, PanelDescriptor};

/// Text prompt plus the exclusion clause sent to a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub positive: String,
    pub negative: String,
}

pub struct PromptBuilder {
    negative: String,
}

impl PromptBuilder {
    pub fn new(negative: impl Into<String>) -> Self {
        Self {
            negative: negative.into(),
        }
    }

    /// Only characters named somewhere in the panel are described.
    pub fn build(
        &self,
        panel: &PanelDescriptor,
        style: &str,
        characters: &[CharacterReference],
        max_chars: usize,
    ) -> Prompt {
        let mut parts = vec![format!("{} style comic panel illustration", style.trim())];
        parts.push(panel.scene.trim().to_string());
        if let Some(actions) = &panel.character_actions {
            parts.push(actions.trim().to_string());
        }
        if let Some(mood) = &panel.mood {
            parts.push(format!("Mood: {}", mood.trim()));
        }

        for character in mentioned_characters(panel, characters) {
            if !character.description.trim().is_empty() {
                parts.push(format!("{}: {}", character.name.trim(), character.description.trim()));
            }
        }

        let positive = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(". ");

        Prompt {
            positive: truncate_at_word(&positive, max_chars),
            negative: self.negative.clone(),
        }
    }
}

/// Characters whose name appears in the panel text, case-insensitively, in list order.
pub fn mentioned_characters<'a>(
    panel: &PanelDescriptor,
    characters: &'a [CharacterReference],
) -> impl Iterator<Item = &'a CharacterReference> {
    let text = panel.combined_text().to_lowercase();
    characters.iter().filter(move |c| {
        let name = c.name.trim();
        !name.is_empty() && text.contains(&name.to_lowercase())
    })
}

/// Cuts `text` to at most `max_chars` characters, backing up to the last whitespace.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => head[..pos].trim_end().to_string(),
        _ => head,
    }
}
