use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::model::AspectRatio;
use crate::services::providers::{check_status, GenerationRequest, ImageProvider, ProviderError};

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiImageConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    "imagen-3.0-generate-002".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

// --- Wire format ---

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    sample_count: u32,
    aspect_ratio: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    negative_prompt: &'a str,
    seed: u64,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    rai_filtered_reason: Option<String>,
}

/// Imagen has no 4:5, so portrait pages ask for its nearest tall ratio.
fn aspect_tag(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Portrait4x5 => "3:4",
        AspectRatio::Landscape16x9 => "16:9",
        AspectRatio::Story9x16 => "9:16",
        AspectRatio::Square => "1:1",
    }
}

fn build_request(request: &GenerationRequest) -> PredictRequest<'_> {
    PredictRequest {
        instances: vec![PredictInstance {
            prompt: &request.prompt,
        }],
        parameters: PredictParameters {
            sample_count: 1,
            aspect_ratio: aspect_tag(request.aspect_ratio),
            negative_prompt: request.negative_prompt.trim(),
            // Imagen seeds are 32-bit.
            seed: request.seed % (u32::MAX as u64 + 1),
        },
    }
}

fn extract_image(body: &str) -> Result<Vec<u8>, ProviderError> {
    let response: PredictResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Unavailable(format!("Unexpected Imagen response: {}", e)))?;

    // Filtered prompts come back with no predictions at all.
    let first = response
        .predictions
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ContentRejected("no predictions returned".to_string()))?;

    if let Some(reason) = first.rai_filtered_reason {
        return Err(ProviderError::ContentRejected(reason));
    }
    let encoded = first
        .bytes_base64_encoded
        .filter(|s| !s.is_empty())
        .ok_or(ProviderError::EmptyPayload)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

// --- Client ---

pub struct GeminiImageProvider {
    config: GeminiImageConfig,
    client: reqwest::Client,
}

impl GeminiImageProvider {
    pub fn new(config: GeminiImageConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl ImageProvider for GeminiImageProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn max_prompt_chars(&self) -> usize {
        1800
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ProviderError> {
        let url = format!(
            "{}/models/{}:predict",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_request(request))
            .send()
            .await?;
        let text = check_status(resp).await?.text().await?;

        let bytes = extract_image(&text)?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerationRequest {
            prompt: "A lighthouse".to_string(),
            negative_prompt: "text".to_string(),
            aspect_ratio: AspectRatio::Portrait4x5,
            seed: u32::MAX as u64 + 5,
            reference_image: None,
        };
        let json = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(json["instances"][0]["prompt"], "A lighthouse");
        assert_eq!(json["parameters"]["sampleCount"], 1);
        assert_eq!(json["parameters"]["aspectRatio"], "3:4");
        assert_eq!(json["parameters"]["negativePrompt"], "text");
        assert_eq!(json["parameters"]["seed"], 4);
    }

    #[test]
    fn test_empty_negative_prompt_is_omitted() {
        let request = GenerationRequest {
            prompt: "p".to_string(),
            negative_prompt: "  ".to_string(),
            aspect_ratio: AspectRatio::Square,
            seed: 0,
            reference_image: None,
        };
        let json = serde_json::to_value(build_request(&request)).unwrap();
        assert!(json["parameters"].get("negativePrompt").is_none());
    }

    #[test]
    fn test_prediction_is_decoded() {
        let body = r#"{"predictions": [{"bytesBase64Encoded": "iVBORw==", "mimeType": "image/png"}]}"#;
        assert_eq!(extract_image(body).unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[test]
    fn test_filtered_responses_are_rejections() {
        assert!(matches!(extract_image("{}"), Err(ProviderError::ContentRejected(_))));
        let filtered = r#"{"predictions": [{"raiFilteredReason": "unsafe content"}]}"#;
        assert!(matches!(
            extract_image(filtered),
            Err(ProviderError::ContentRejected(reason)) if reason == "unsafe content"
        ));
        let blank = r#"{"predictions": [{"mimeType": "image/png"}]}"#;
        assert!(matches!(extract_image(blank), Err(ProviderError::EmptyPayload)));
    }
}
