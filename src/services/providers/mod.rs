use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use thiserror::Error;

use crate::core::config::ImageConfig;
use crate::core::model::AspectRatio;

/// Why an adapter produced no image. Every variant makes the chain move on.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Provider timed out after {0} seconds")]
    Timeout(u64),
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider returned an empty payload")]
    EmptyPayload,
    #[error("Provider rejected the content: {0}")]
    ContentRejected(String),
    #[error("Image bytes could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Unavailable(format!("request timed out: {}", e))
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub aspect_ratio: AspectRatio,
    pub seed: u64,
    /// Encoded photo of a character named in the panel. Adapters that cannot
    /// condition on an image ignore it.
    pub reference_image: Option<Vec<u8>>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Longest prompt the backend accepts.
    fn max_prompt_chars(&self) -> usize {
        1000
    }

    /// One attempt, no retries. Returns encoded image bytes.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ProviderError>;
}

/// Fails with `Status`, or `ContentRejected` when the body reads like a moderation refusal.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 400 && looks_like_moderation(&body) {
        return Err(ProviderError::ContentRejected(body));
    }
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn looks_like_moderation(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["content_policy", "content policy", "moderation", "safety"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Adapters in the configured order. Unknown names or missing sections are startup errors.
pub fn create_providers(config: &ImageConfig, http: reqwest::Client) -> Result<Vec<Box<dyn ImageProvider>>> {
    let mut providers: Vec<Box<dyn ImageProvider>> = Vec::with_capacity(config.providers.len());
    for name in &config.providers {
        info!("Initializing image provider: {}", name);
        let provider: Box<dyn ImageProvider> = match name.as_str() {
            "openai" => {
                let cfg = config
                    .openai
                    .clone()
                    .ok_or_else(|| anyhow!("OpenAI image config missing"))?;
                Box::new(openai::OpenAiImageProvider::new(cfg, http.clone()))
            }
            "gemini" => {
                let cfg = config
                    .gemini
                    .clone()
                    .ok_or_else(|| anyhow!("Gemini image config missing"))?;
                Box::new(gemini::GeminiImageProvider::new(cfg, http.clone()))
            }
            "url" => {
                let cfg = config
                    .url
                    .clone()
                    .ok_or_else(|| anyhow!("URL template config missing"))?;
                Box::new(url_template::UrlTemplateProvider::new(cfg, http.clone())?)
            }
            _ => return Err(anyhow!("Unknown image provider: {}", name)),
        };
        providers.push(provider);
    }
    Ok(providers)
}

pub mod gemini;
pub mod openai;
pub mod url_template;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_detection() {
        assert!(looks_like_moderation(
            r#"{"error":{"code":"content_policy_violation","message":"..."}}"#
        ));
        assert!(looks_like_moderation("Rejected by the Safety system"));
        assert!(!looks_like_moderation(r#"{"error":"invalid size"}"#));
    }

    #[test]
    fn test_factory_keeps_configured_order() {
        let mut config = ImageConfig::default();
        config.providers = vec!["url".to_string(), "openai".to_string()];
        config.url = Some(url_template::UrlTemplateConfig {
            template: "https://img.example/{prompt}".to_string(),
            max_prompt_chars: None,
        });
        config.openai = Some(openai::OpenAiImageConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        });

        let providers = create_providers(&config, reqwest::Client::new()).unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["url", "openai"]);
    }

    #[test]
    fn test_factory_rejects_unknown_and_unconfigured() {
        let mut config = ImageConfig::default();
        config.providers = vec!["midjourney".to_string()];
        assert!(create_providers(&config, reqwest::Client::new()).is_err());

        config.providers = vec!["gemini".to_string()];
        assert!(create_providers(&config, reqwest::Client::new()).is_err());

        config.providers.clear();
        assert!(create_providers(&config, reqwest::Client::new()).unwrap().is_empty());
    }
}
