//! Minimal client for OpenAI-compatible chat-completion endpoints.
//!
//! Only the LLM-backed resolver and formatter use it; the pipeline never sees
//! prompts or model names.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::LlmConfig, error::truncate_body};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("Failed to reach language model: {0}")]
    Transport(String),

    #[error("Language model request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse language model response: {0}")]
    Decode(String),

    #[error("Language model returned no choices")]
    NoChoices,
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self { endpoint: endpoint.into(), model: model.into(), api_key, http: Client::new() }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.endpoint.clone(), config.model.clone(), config.api_key.clone())
    }

    /// Sends a single user message and returns the first choice's text.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.0,
        };

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = res.status();
        let text = res.text().await.map_err(|e| LlmError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Status { status: status.as_u16(), body: truncate_body(&text) });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(LlmError::NoChoices)
    }
}
