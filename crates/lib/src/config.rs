//! Configuration types and loading.
//!
//! Config is a JSON file (e.g. `~/.config/desktop-ai/config.json`) plus a few
//! environment overrides. A missing or corrupt file is never an error: defaults
//! are used and the problem is logged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::AgentConfig;

pub const DEFAULT_MODEL: &str = "gpt-oss:20b";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_API_KEY: &str = "sk-fake_api_key";

const APP_DIR_NAME: &str = "desktop-ai";
const CONFIG_FILE_NAME: &str = "config.json";
const DATABASE_FILE_NAME: &str = "conversations.db";

/// Top-level application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Selected model, exactly as listed by the model host (e.g. "gpt-oss:20b").
    #[serde(default = "default_model")]
    pub model: String,

    /// Instructions sent as the system message of every request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// OpenAI-compatible endpoint root (default "http://localhost:11434/v1").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key for the endpoint. Overridden by DAI_API_KEY env.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model host root used to list installed models. When absent, derived from `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,

    /// Conversation database. Overridden by DAI_DATABASE_PATH env.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Timeout for a single chat completion request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keys this version does not know about; kept so saving does not drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            base_url: default_base_url(),
            api_key: None,
            ollama_url: None,
            database_path: None,
            request_timeout_secs: default_request_timeout_secs(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// Snapshot of the settings the chat agent binds to.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            base_url: self.base_url.clone(),
            api_key: resolve_api_key(self),
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the API key: env DAI_API_KEY overrides config; falls back to the placeholder
/// key local hosts accept.
pub fn resolve_api_key(config: &Config) -> String {
    non_empty_env("DAI_API_KEY")
        .or_else(|| {
            config
                .api_key
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_API_KEY.to_string())
}

/// Model host root: `ollama_url` when set, otherwise `base_url` without its `/v1` suffix.
pub fn resolve_ollama_url(config: &Config) -> String {
    if let Some(url) = config
        .ollama_url
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        return url.trim_end_matches('/').to_string();
    }
    let base = config.base_url.trim().trim_end_matches('/');
    base.strip_suffix("/v1").unwrap_or(base).to_string()
}

/// Resolve the conversation database path: env DAI_DATABASE_PATH, then config, then the
/// per-user data directory.
pub fn resolve_database_path(config: &Config) -> PathBuf {
    if let Some(p) = non_empty_env("DAI_DATABASE_PATH") {
        return PathBuf::from(p);
    }
    if let Some(p) = config
        .database_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        return p.clone();
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME).join(DATABASE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DAI_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
        })
}

/// Load config from the given path (or the default). Missing or corrupt file => defaults.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> (Config, PathBuf) {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        match read_config(&path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("ignoring unreadable config, using defaults: {:#}", e);
                Config::default()
            }
        }
    };
    (config, path)
}

fn read_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Write config as pretty JSON, creating the parent directory when needed.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, json).with_context(|| format!("writing config to {}", path.display()))?;
    Ok(())
}

/// Owned configuration handle: the single writer of the config file for this process.
///
/// Setters update memory first and then persist; a failed write is logged and the
/// in-memory value stays authoritative until the next `reload`.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    config: Config,
}

impl Settings {
    pub fn load(path: Option<PathBuf>) -> Self {
        let (config, path) = load_config(path);
        Self { path, config }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent_config(&self) -> AgentConfig {
        self.config.agent_config()
    }

    /// Re-read the file, discarding unsaved in-memory changes.
    pub fn reload(&mut self) {
        let (config, _) = load_config(Some(self.path.clone()));
        self.config = config;
    }

    pub fn save(&self) -> Result<()> {
        save_config(&self.config, &self.path)
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
        self.persist();
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.config.system_prompt = prompt.into();
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            log::warn!("could not save config: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, path) = load_config(Some(dir.path().join("config.json")));
        assert_eq!(config, Config::default());
        assert_eq!(path, dir.path().join("config.json"));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        let (config, _) = load_config(Some(path));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn missing_keys_default_and_unknown_keys_survive_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"model": "llama3.2:latest", "theme": "nord"}"#).expect("write");

        let mut settings = Settings::load(Some(path.clone()));
        assert_eq!(settings.config().model, "llama3.2:latest");
        assert_eq!(settings.config().system_prompt, DEFAULT_SYSTEM_PROMPT);

        settings.set_system_prompt("Be brief");
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["system_prompt"], "Be brief");
        assert_eq!(raw["theme"], "nord");
    }

    #[test]
    fn set_model_persists_across_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let mut settings = Settings::load(Some(path.clone()));
        settings.set_model("qwen3:8b");

        let mut other = Settings::load(Some(path));
        assert_eq!(other.config().model, "qwen3:8b");
        other.reload();
        assert_eq!(other.config().model, "qwen3:8b");
    }

    #[test]
    fn ollama_url_derived_from_base_url() {
        let mut config = Config::default();
        assert_eq!(resolve_ollama_url(&config), "http://localhost:11434");

        config.base_url = "http://gpu-box:11434/v1/".to_string();
        assert_eq!(resolve_ollama_url(&config), "http://gpu-box:11434");

        config.ollama_url = Some("http://other:11434/".to_string());
        assert_eq!(resolve_ollama_url(&config), "http://other:11434");
    }

    #[test]
    fn database_path_from_config() {
        let mut config = Config::default();
        config.database_path = Some(PathBuf::from("/tmp/history.db"));
        if std::env::var("DAI_DATABASE_PATH").is_err() {
            assert_eq!(resolve_database_path(&config), PathBuf::from("/tmp/history.db"));
        }
    }
}
