//! Startup checks shared by the binaries: display presence, model host reachability,
//! and choosing the model to start with. Each failure maps to a distinct exit code.

use crate::models::{pick_model, ModelDirectory};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const NO_DISPLAY: i32 = 2;
    pub const HOST_UNREACHABLE: i32 = 3;
    pub const NO_MODELS: i32 = 4;
    pub const CONFIG: i32 = 5;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupError {
    #[error("no graphical display available (DISPLAY and WAYLAND_DISPLAY are unset)")]
    NoDisplay,
    #[error("cannot reach the model host at {0}; is Ollama running?")]
    HostUnreachable(String),
    #[error("no models installed on {0}; pull one first (e.g. `ollama pull llama3.2`)")]
    NoModels(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::NoDisplay => exit_code::NO_DISPLAY,
            StartupError::HostUnreachable(_) => exit_code::HOST_UNREACHABLE,
            StartupError::NoModels(_) => exit_code::NO_MODELS,
            StartupError::Config(_) => exit_code::CONFIG,
        }
    }
}

/// Fail fast when there is nowhere to open a window.
pub fn check_display() -> Result<(), StartupError> {
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        return Ok(());
    }
    let display = std::env::var("DISPLAY").ok();
    let wayland = std::env::var("WAYLAND_DISPLAY").ok();
    if display_available_from(display.as_deref(), wayland.as_deref()) {
        Ok(())
    } else {
        Err(StartupError::NoDisplay)
    }
}

/// True when either display variable is set to something non-blank.
pub fn display_available_from(display: Option<&str>, wayland_display: Option<&str>) -> bool {
    [display, wayland_display]
        .iter()
        .flatten()
        .any(|v| !v.trim().is_empty())
}

/// Model to start with: `preferred` when installed, else the first installed model.
/// Errors when the host is down or has no models.
pub async fn resolve_startup_model(
    directory: &ModelDirectory,
    preferred: &str,
) -> Result<String, StartupError> {
    if !directory.is_available().await {
        return Err(StartupError::HostUnreachable(directory.host().to_string()));
    }
    let models = directory.get_models().await;
    let model = pick_model(&models, preferred)
        .ok_or_else(|| StartupError::NoModels(directory.host().to_string()))?;
    if model != preferred {
        log::warn!(
            "startup: model {:?} is not installed, using {:?}",
            preferred,
            model
        );
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_detection() {
        assert!(!display_available_from(None, None));
        assert!(!display_available_from(Some(""), Some("  ")));
        assert!(display_available_from(Some(":0"), None));
        assert!(display_available_from(None, Some("wayland-0")));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            StartupError::NoDisplay.exit_code(),
            StartupError::HostUnreachable(String::new()).exit_code(),
            StartupError::NoModels(String::new()).exit_code(),
            StartupError::Config(String::new()).exit_code(),
            exit_code::GENERAL,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(StartupError::NoDisplay.exit_code(), 2);
    }
}
