//! LLM abstraction: OpenAI-compatible chat completions and the Ollama model host.
//!
//! The chat agent only sees [`LlmBackend`], so tests can drive it with a fake.

mod ollama;
mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ollama::{OllamaClient, OllamaError, OllamaModel};
pub use openai::OpenAiClient;

/// One chat message as sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
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

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A chat-completion backend: messages in, assistant text out.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, LlmError>;
}
