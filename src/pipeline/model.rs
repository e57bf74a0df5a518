//! External model client
//!
//! Thin Chat Completions client for the tier-6 fallback. One attempt per
//! message with explicit request and connect timeouts; any failure is
//! surfaced to the orchestrator, which falls through to the deterministic
//! fallback tier. No retries: a hanging or flaky model endpoint must never
//! delay the pipeline beyond its deadline.

use crate::{Result, SalubotError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default request timeout for one completion.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded token budget per answer (WhatsApp-sized responses).
const DEFAULT_MAX_TOKENS: u32 = 800;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Configuration for the external model endpoint.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl ModelConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: std::env::var("SALUBOT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

/// One prompt message in the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat Completions client. Optional: the pipeline runs without one.
pub struct ModelClient {
    client: reqwest::Client,
    config: ModelConfig,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("salubot/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    /// Request one completion. Single attempt; all failures map to
    /// [`SalubotError::Model`].
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!("Model call: {} messages to {}", messages.len(), url);

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SalubotError::Model(format!(
                "API error {}: {}",
                status,
                extract_error_detail(&body)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SalubotError::Model(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| SalubotError::Model("empty completion".to_string()))
    }

    fn map_reqwest_error(e: reqwest::Error) -> SalubotError {
        if e.is_timeout() {
            SalubotError::Model(format!("timeout: {e}"))
        } else if e.is_connect() {
            SalubotError::Model(format!("network: {e}"))
        } else {
            SalubotError::Model(e.to_string())
        }
    }
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }
    let mut detail: String = trimmed.chars().take(200).collect();
    if detail.len() < trimmed.len() {
        detail.push_str("...");
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }

    #[test]
    fn test_extract_error_detail_from_json() {
        let body = r#"{"error": {"message": "invalid api key", "type": "auth"}}"#;
        assert_eq!(extract_error_detail(body), "invalid api key");
        assert_eq!(extract_error_detail(""), "");
        assert_eq!(extract_error_detail("plain text"), "plain text");
    }

    #[test]
    fn test_config_builder() {
        let config = ModelConfig::new("key".to_string())
            .with_model("gpt-4o")
            .with_base_url("http://localhost:1234/v1/");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "http://localhost:1234/v1");
    }
}
