use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Story-splitting language model, selected by `llm.provider`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini", "ollama" or "openai"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig, http: reqwest::Client) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiChat {
                endpoint: format!(
                    "{}/models/{}:generateContent",
                    base_url(cfg.base_url.as_deref(), "https://generativelanguage.googleapis.com/v1beta"),
                    cfg.model
                ),
                api_key: cfg.api_key.clone(),
                http,
            }))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Ok(Box::new(OllamaChat {
                endpoint: format!("{}/api/chat", base_url(Some(&cfg.base_url), "")),
                model: cfg.model.clone(),
                http,
            }))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIChat {
                endpoint: format!(
                    "{}/chat/completions",
                    base_url(cfg.base_url.as_deref(), "https://api.openai.com/v1")
                ),
                api_key: cfg.api_key.clone(),
                model: cfg.model.clone(),
                http,
            }))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

fn base_url<'a>(configured: Option<&'a str>, fallback: &'a str) -> &'a str {
    configured.unwrap_or(fallback).trim_end_matches('/')
}

/// Sends `request`, fails on non-2xx with the body attached, and decodes the JSON reply.
async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder, service: &str) -> Result<T> {
    let resp = request
        .send()
        .await
        .with_context(|| format!("{} request failed", service))?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        bail!("{} API error ({}): {}", service, status, body);
    }
    serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse {} response. Body: {}", service, body))
}

// --- Shared chat wire format (Ollama and OpenAI) ---

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn chat_messages<'a>(system: &'a str, user: &'a str) -> [ChatMessage<'a>; 2] {
    [
        ChatMessage {
            role: "system",
            content: system,
        },
        ChatMessage {
            role: "user",
            content: user,
        },
    ]
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

fn non_empty_reply(message: ReplyMessage, service: &str) -> Result<String> {
    message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow!("{} response empty or missing content", service))
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiChat {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [GeminiContent<'a>; 1],
    system_instruction: GeminiContent<'a>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiApiError {
    message: String,
}

fn gemini_request<'a>(system: &'a str, user: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: [GeminiContent {
            role: Some("user"),
            parts: [GeminiPart { text: user }],
        }],
        system_instruction: GeminiContent {
            role: None,
            parts: [GeminiPart { text: system }],
        },
    }
}

/// First candidate's text, joined across parts.
fn gemini_text(response: GenerateResponse) -> Result<String> {
    if let Some(err) = response.error {
        bail!("Gemini API returned error: {}", err.message);
    }
    let first = response
        .candidates
        .into_iter()
        .next()
        .context("Gemini response had no candidates")?;

    let text: String = first
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        // Missing content is usually a safety block.
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        bail!("Gemini response empty. Finish reason: {}", reason);
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiChat {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_request(system, user));
        gemini_text(send_json(request, "Gemini").await?)
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaChat {
    endpoint: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaReply {
    message: ReplyMessage,
}

#[async_trait]
impl LlmClient for OllamaChat {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = OllamaRequest {
            model: &self.model,
            messages: chat_messages(system, user),
            stream: false,
        };
        let reply: OllamaReply = send_json(self.http.post(&self.endpoint).json(&body), "Ollama").await?;
        non_empty_reply(reply.message, "Ollama")
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIChat {
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

fn completion_text(completion: Completion) -> Result<String> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .context("OpenAI response had no choices")?;
    non_empty_reply(choice.message, "OpenAI")
}

#[async_trait]
impl LlmClient for OpenAIChat {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: chat_messages(system, user),
        };
        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        completion_text(send_json(request, "OpenAI").await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            retry_count: 3,
            retry_delay_seconds: 0,
            gemini: None,
            ollama: None,
            openai: None,
        }
    }

    #[test]
    fn test_gemini_request_carries_system_instruction() {
        let json = serde_json::to_value(gemini_request("be brief", "a story")).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a story");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_gemini_safety_block_reports_finish_reason() {
        let json = r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#;
        let err = gemini_text(serde_json::from_str(json).unwrap()).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let no_parts = r#"{"candidates": [{"content": {"role": "model"}, "finishReason": "STOP"}]}"#;
        assert!(gemini_text(serde_json::from_str(no_parts).unwrap()).is_err());
    }

    #[test]
    fn test_gemini_text_joins_parts() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "[{\"panel\": 1,"}, {"text": " \"scene\": \"x\"}]"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }"#;
        let text = gemini_text(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(text, r#"[{"panel": 1, "scene": "x"}]"#);

        let api_error = r#"{"error": {"code": 429, "message": "quota exceeded"}}"#;
        let err = gemini_text(serde_json::from_str(api_error).unwrap()).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_openai_completion_parsing() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "[]"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
        }"#;
        assert_eq!(completion_text(serde_json::from_str(json).unwrap()).unwrap(), "[]");

        let refused = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        assert!(completion_text(serde_json::from_str(refused).unwrap()).is_err());
        assert!(completion_text(serde_json::from_str(r#"{"choices": []}"#).unwrap()).is_err());
    }

    #[test]
    fn test_chat_messages_are_system_then_user() {
        let body = CompletionRequest {
            model: "gpt-4o-mini",
            messages: chat_messages("sys", "usr"),
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "usr");
    }

    #[test]
    fn test_create_llm_rejects_unknown_or_unconfigured_provider() {
        let http = reqwest::Client::new();
        assert!(create_llm(&config("mistral"), http.clone()).is_err());

        let mut cfg = config("ollama");
        assert!(create_llm(&cfg, http.clone()).is_err());

        cfg.ollama = Some(OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            model: "llama3".to_string(),
        });
        assert!(create_llm(&cfg, http).is_ok());
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(base_url(Some("http://localhost:11434/"), ""), "http://localhost:11434");
        assert_eq!(base_url(None, "https://api.openai.com/v1"), "https://api.openai.com/v1");
    }
}
