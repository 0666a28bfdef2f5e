//! Chat agent: binds model + system prompt + session into a single "get a reply"
//! operation. History is read from and written to the session store; inference is
//! delegated to an [`LlmBackend`].
//!
//! The agent is cheap to clone. Callers hand a clone to the task bridge so the
//! worker runs with the configuration as it was at dispatch time; configuration
//! changes happen on the UI thread only, while no request is in flight.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DEFAULT_MODEL;
use crate::llm::{ChatMessage, LlmBackend, LlmError, OpenAiClient};
use crate::session::{Content, Role, SessionId, SessionStore};

/// Prefix of every reply that reports a failed request instead of model output.
pub const ERROR_PREFIX: &str = "Error: ";

/// Settings the agent binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub base_url: String,
    pub api_key: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        crate::config::Config::default().agent_config()
    }
}

/// Generate a fresh session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct ChatAgent {
    config: AgentConfig,
    backend: Arc<dyn LlmBackend>,
    store: SessionStore,
    session_id: SessionId,
}

impl ChatAgent {
    /// New agent bound to a fresh session.
    pub fn new(config: AgentConfig, backend: Arc<dyn LlmBackend>, store: SessionStore) -> Self {
        Self {
            config,
            backend,
            store,
            session_id: new_session_id(),
        }
    }

    /// Agent talking to the OpenAI-compatible endpoint named in `config`.
    pub fn with_openai(config: AgentConfig, store: SessionStore, timeout: Duration) -> Self {
        let client = OpenAiClient::new(
            Some(config.base_url.clone()),
            Some(config.api_key.clone()),
            Some(timeout),
        );
        Self::new(config, Arc::new(client), store)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.config.system_prompt
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Switch models. Context does not carry over: the agent starts a new session.
    pub fn update_model(&mut self, name: impl Into<String>) {
        self.config.model = name.into();
        log::info!("agent: model set to {}", self.config.model);
        self.reset();
    }

    pub fn update_system_prompt(&mut self, text: impl Into<String>) {
        self.config.system_prompt = text.into();
        log::info!("agent: system prompt updated");
    }

    /// Drop the current context; the next request starts a new session.
    pub fn reset(&mut self) {
        self.session_id = new_session_id();
        log::debug!("agent: new session {}", self.session_id);
    }

    /// Continue an existing session: later turns are appended to its history.
    pub fn load_session(&mut self, session_id: impl Into<SessionId>) {
        self.session_id = session_id.into();
        log::info!("agent: resumed session {}", self.session_id);
    }

    /// Reply to `prompt` within the bound session. Never fails: on any error the
    /// returned text starts with [`ERROR_PREFIX`] and nothing is persisted.
    pub async fn get_response(&self, prompt: &str) -> String {
        match self.try_get_response(prompt).await {
            Ok(reply) => reply,
            Err(e) => format!("{}{}", ERROR_PREFIX, e),
        }
    }

    /// Like [`get_response`](Self::get_response) but keeps the failure typed, so
    /// callers never have to inspect the reply text to tell the two apart.
    pub async fn try_get_response(&self, prompt: &str) -> Result<String, LlmError> {
        let result = self.request_reply(prompt).await;
        if let Err(ref e) = result {
            log::warn!("agent: request failed: {}", e);
        }
        result
    }

    async fn request_reply(&self, prompt: &str) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if !self.config.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        }
        for m in self.store.get_messages(&self.session_id) {
            if m.role == Role::System {
                continue;
            }
            messages.push(ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.to_plain_text(),
            });
        }
        messages.push(ChatMessage::user(prompt));

        let model = self.config.model.trim();
        let model = if model.is_empty() {
            log::warn!("agent: configured model was empty, using fallback");
            DEFAULT_MODEL
        } else {
            model
        };
        log::info!(
            "agent: sending {} message(s) to {} (session {})",
            messages.len(),
            model,
            self.session_id
        );
        let reply = self.backend.chat(model, messages).await?;

        let turn = [
            (Role::User, Content::from(prompt)),
            (Role::Assistant, Content::from(reply.clone())),
        ];
        if let Err(e) = self.store.append_messages(&self.session_id, &turn) {
            log::warn!(
                "agent: could not persist turn for session {}: {}",
                self.session_id,
                e
            );
        }
        Ok(reply)
    }
}
