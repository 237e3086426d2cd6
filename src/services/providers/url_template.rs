use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::providers::{check_status, GenerationRequest, ImageProvider, ProviderError};

// --- Config ---

/// GET endpoint whose body is the image itself, e.g.
/// `https://image.example/prompt/{prompt}?width={width}&height={height}&seed={seed}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UrlTemplateConfig {
    pub template: String,
    pub max_prompt_chars: Option<usize>,
}

fn encode(value: &str) -> String {
    // form encoding writes spaces as '+', which path segments would keep literally
    ::url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn render(template: &str, request: &GenerationRequest) -> String {
    let (width, height) = request.aspect_ratio.panel_size();
    template
        .replace("{prompt}", &encode(&request.prompt))
        .replace("{negative}", &encode(&request.negative_prompt))
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
        .replace("{seed}", &request.seed.to_string())
}

// --- Client ---

pub struct UrlTemplateProvider {
    config: UrlTemplateConfig,
    client: reqwest::Client,
}

impl UrlTemplateProvider {
    pub fn new(config: UrlTemplateConfig, client: reqwest::Client) -> Result<Self> {
        if !config.template.contains("{prompt}") {
            bail!("URL template must contain {{prompt}}: {}", config.template);
        }
        let sample = GenerationRequest {
            prompt: "sample".to_string(),
            negative_prompt: String::new(),
            aspect_ratio: Default::default(),
            seed: 0,
            reference_image: None,
        };
        ::url::Url::parse(&render(&config.template, &sample))
            .with_context(|| format!("Invalid URL template: {}", config.template))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ImageProvider for UrlTemplateProvider {
    fn name(&self) -> &str {
        "url"
    }

    fn max_prompt_chars(&self) -> usize {
        self.config.max_prompt_chars.unwrap_or(1000)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ProviderError> {
        let url = render(&self.config.template, request);
        let resp = self.client.get(&url).send().await?;
        let bytes = check_status(resp).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }
        Ok(bytes.to_vec())
    }
}
