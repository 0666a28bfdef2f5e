//! OpenAI-compatible chat completions client (POST {base}/chat/completions).
//!
//! Ollama serves this API under `/v1`; any compatible server works. Requests are
//! non-streaming and carry only role/content messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, LlmBackend, LlmError};

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().unwrap_or_else(|e| {
            log::warn!("openai: falling back to default http client: {}", e);
            reqwest::Client::new()
        });
        Self {
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /chat/completions: non-streaming; returns the first choice's text.
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: false,
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let text = res.text().await?;
        let data: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))?;
        response_text(data)
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        self.chat_completion(model, &messages).await
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Extract assistant text: `content` is a string, or an array of parts carrying `text`.
fn response_text(data: ChatCompletionResponse) -> Result<String, LlmError> {
    if let Some(err) = data.error {
        return Err(LlmError::Api(
            err.message.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    let message = data
        .choices
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;
    match message.content {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(serde_json::Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("")),
        Some(serde_json::Value::Null) | None => Ok(String::new()),
        Some(other) => Err(LlmError::Malformed(format!(
            "unexpected content type: {}",
            other
        ))),
    }
}
