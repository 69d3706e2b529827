//! Chat-completion clients used to synthesize answers.
//!
//! [`ChatModel`] is a single-turn interface: one rendered prompt in, one
//! answer out. Implementations:
//! - **[`GeminiChat`]**: `models/{model}:generateContent`
//! - **[`OpenAIChat`]**: `POST /v1/chat/completions`

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{Config, LlmConfig};
use crate::provider::{build_client, send_json_with_retry, ProviderError};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a completion for a fully rendered prompt.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

pub fn create_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    let cfg = &config.llm;
    match cfg.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiChat::new(cfg, config.keys.google.clone())?)),
        "openai" => Ok(Arc::new(OpenAIChat::new(cfg, config.keys.openai.clone())?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

pub struct GeminiChat {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiChat {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .as_deref()
                .unwrap_or(GEMINI_DEFAULT_MODEL)
                .trim_start_matches("models/")
                .to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: build_client("gemini", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey("GOOGLE_API_KEY"))?;

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let json = send_json_with_retry("gemini", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&body)
        })
        .await?;

        parse_gemini_text(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_text(json: &Value) -> Result<String, ProviderError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ProviderError::invalid("gemini", "missing candidates[0].content.parts"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ProviderError::invalid("gemini", "candidate has no text"));
    }
    Ok(text)
}

pub struct OpenAIChat {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: build_client("openai", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey("OPENAI_API_KEY"))?;

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        let url = format!("{}/chat/completions", self.base_url);

        let json = send_json_with_retry("openai", self.max_retries, || {
            self.client.post(&url).bearer_auth(api_key).json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid("openai", "missing choices[0].message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_text_parts_are_joined() {
        let json = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello, " }, { "text": "world." }] }
            }]
        });
        assert_eq!(parse_gemini_text(&json).unwrap(), "Hello, world.");
    }

    #[test]
    fn gemini_without_candidates_is_invalid() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(parse_gemini_text(&json).is_err());
    }

    #[tokio::test]
    async fn openai_without_key_reports_missing_key() {
        let chat = OpenAIChat::new(&LlmConfig::default(), None).unwrap();
        let err = chat.generate("hi").await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey("OPENAI_API_KEY")));
    }

    #[test]
    fn factory_picks_configured_model() {
        let mut config = Config::default();
        config.llm.provider = "openai".to_string();
        config.llm.model = Some("gpt-test".to_string());
        let chat = create_chat_model(&config).unwrap();
        assert_eq!(chat.model_name(), "gpt-test");
    }
}
