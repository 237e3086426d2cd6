use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, warn};
use reqwest::multipart;
use serde::{Deserialize, Serialize};

use crate::core::model::AspectRatio;
use crate::services::prompt::truncate_at_word;
use crate::services::providers::{check_status, GenerationRequest, ImageProvider, ProviderError};

const MAX_PROMPT_CHARS: usize = 4000;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiImageConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `quality` when set, e.g. "medium".
    pub quality: Option<String>,
}

impl Default for OpenAiImageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            quality: None,
        }
    }
}

fn default_model() -> String {
    "gpt-image-1".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

// --- Wire format ---

#[derive(Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u32,
    size: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}

enum Payload {
    Inline(Vec<u8>),
    Remote(String),
}

fn size_for(aspect: AspectRatio) -> &'static str {
    if aspect.is_tall() {
        "1024x1536"
    } else if aspect.is_wide() {
        "1536x1024"
    } else {
        "1024x1024"
    }
}

/// The images endpoint has no negative prompt field, so exclusions ride along in the text.
/// The positive part is shortened to leave room for the clause.
fn compose_prompt(request: &GenerationRequest) -> String {
    let negative = request.negative_prompt.trim();
    if negative.is_empty() {
        return truncate_at_word(&request.prompt, MAX_PROMPT_CHARS);
    }
    let clause = truncate_at_word(&format!(". Avoid: {}", negative), MAX_PROMPT_CHARS / 2);
    let room = MAX_PROMPT_CHARS - clause.chars().count();
    format!("{}{}", truncate_at_word(&request.prompt, room), clause)
}

fn reference_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Multipart body for `/images/edits`, conditioning the panel on a character photo.
fn edit_form(
    config: &OpenAiImageConfig,
    request: &GenerationRequest,
    reference: &[u8],
) -> Result<multipart::Form, ProviderError> {
    let mime = reference_mime(reference)
        .ok_or_else(|| ProviderError::Decode("unsupported reference image format".to_string()))?;
    let extension = mime.trim_start_matches("image/");
    let part = multipart::Part::bytes(reference.to_vec())
        .file_name(format!("reference.{}", extension))
        .mime_str(mime)
        .map_err(|e| ProviderError::Decode(e.to_string()))?;

    let mut form = multipart::Form::new()
        .text("model", config.model.clone())
        .text("prompt", compose_prompt(request))
        .text("n", "1")
        .text("size", size_for(request.aspect_ratio))
        .part("image", part);
    if let Some(quality) = &config.quality {
        form = form.text("quality", quality.clone());
    }
    Ok(form)
}

fn extract_payload(body: &str) -> Result<Payload, ProviderError> {
    let response: ImagesResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Unavailable(format!("Unexpected OpenAI response: {}", e)))?;
    let first = response.data.into_iter().next().ok_or(ProviderError::EmptyPayload)?;

    if let Some(b64) = first.b64_json.filter(|s| !s.is_empty()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        return Ok(Payload::Inline(bytes));
    }
    match first.url.filter(|s| !s.is_empty()) {
        Some(url) => Ok(Payload::Remote(url)),
        None => Err(ProviderError::EmptyPayload),
    }
}

// --- Client ---

pub struct OpenAiImageProvider {
    config: OpenAiImageConfig,
    client: reqwest::Client,
}

impl OpenAiImageProvider {
    pub fn new(config: OpenAiImageConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn edit(&self, request: &GenerationRequest, reference: &[u8]) -> Result<Vec<u8>, ProviderError> {
        debug!("Sending reference image ({} bytes) to OpenAI edits", reference.len());
        let form = edit_form(&self.config, request, reference)?;
        let resp = self
            .client
            .post(self.endpoint("images/edits"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;
        self.read_image(resp).await
    }

    async fn read_image(&self, resp: reqwest::Response) -> Result<Vec<u8>, ProviderError> {
        let text = check_status(resp).await?.text().await?;
        let bytes = match extract_payload(&text)? {
            Payload::Inline(bytes) => bytes,
            Payload::Remote(image_url) => {
                let resp = self.client.get(&image_url).send().await?;
                check_status(resp).await?.bytes().await?.to_vec()
            }
        };

        if bytes.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn max_prompt_chars(&self) -> usize {
        MAX_PROMPT_CHARS
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ProviderError> {
        if let Some(reference) = &request.reference_image {
            match self.edit(request, reference).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => warn!("OpenAI edit with reference image failed, retrying text-only: {}", e),
            }
        }

        let body = ImagesRequest {
            model: &self.config.model,
            prompt: compose_prompt(request),
            n: 1,
            size: size_for(request.aspect_ratio),
            quality: self.config.quality.as_deref(),
        };

        let resp = self
            .client
            .post(self.endpoint("images/generations"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        self.read_image(resp).await
    }
}
