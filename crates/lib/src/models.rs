//! Model directory: which models the local host can serve, and whether it is up.
//!
//! Both queries swallow errors (logged at warn) so callers can treat an empty list
//! or `false` as "nothing usable right now".

use std::time::Duration;

use crate::config::{resolve_ollama_url, Config};
use crate::llm::OllamaClient;

/// Upper bound for a single directory query.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ModelDirectory {
    client: OllamaClient,
}

impl ModelDirectory {
    /// Directory for the host at `host` (e.g. "http://localhost:11434"); None uses the default.
    pub fn new(host: Option<String>) -> Self {
        Self {
            client: OllamaClient::new(host, Some(PROBE_TIMEOUT)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Some(resolve_ollama_url(config)))
    }

    pub fn host(&self) -> &str {
        self.client.base_url()
    }

    /// Installed model names in ascending order. Empty when the host is unreachable
    /// or answers with something unexpected.
    pub async fn get_models(&self) -> Vec<String> {
        match self.client.list_models().await {
            Ok(models) => {
                let mut names: Vec<String> = models.iter().map(|m| m.id().to_string()).collect();
                names.sort();
                names.dedup();
                log::debug!("models: {} installed on {}", names.len(), self.host());
                names
            }
            Err(e) => {
                log::warn!("models: could not list models on {}: {}", self.host(), e);
                Vec::new()
            }
        }
    }

    /// Whether the host answers at all.
    pub async fn is_available(&self) -> bool {
        match self.client.version().await {
            Ok(v) => {
                log::debug!("models: host {} is up (version {})", self.host(), v);
                true
            }
            Err(e) => {
                log::warn!("models: host {} unavailable: {}", self.host(), e);
                false
            }
        }
    }
}

/// `preferred` when it is installed, otherwise the first installed model.
pub fn pick_model(models: &[String], preferred: &str) -> Option<String> {
    if models.iter().any(|m| m == preferred) {
        return Some(preferred.to_string());
    }
    models.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn preferred_model_kept_when_installed() {
        let models = names(&["gpt-oss:20b", "llama3.2:latest"]);
        assert_eq!(
            pick_model(&models, "llama3.2:latest").as_deref(),
            Some("llama3.2:latest")
        );
    }

    #[test]
    fn falls_back_to_first_model() {
        let models = names(&["gpt-oss:20b", "llama3.2:latest"]);
        assert_eq!(pick_model(&models, "mistral").as_deref(), Some("gpt-oss:20b"));
        assert_eq!(pick_model(&[], "mistral"), None);
    }

    #[test]
    fn host_from_config() {
        let dir = ModelDirectory::from_config(&Config::default());
        assert_eq!(dir.host(), "http://localhost:11434");
    }
}
