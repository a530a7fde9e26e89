//! Model configuration loading and validation.
//!
//! Configuration lives in `llm_config.json`, looked up first in the
//! workspace directory and then in the current directory. The API key can be
//! inlined (`api_key`) or pulled from an environment variable
//! (`api_key_env`).
//!
//! # Example llm_config.json
//!
//! ```json
//! {
//!   "base_url": "https://api.deepseek.com/v1",
//!   "model": "deepseek-chat",
//!   "api_key_env": "DEEPSEEK_API_KEY",
//!   "temperature": 1.0
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Configuration file name, resolved against the workspace then the cwd.
pub const CONFIG_FILE: &str = "llm_config.json";

/// Configuration for the chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Inline API key. Prefer `api_key_env` outside local experiments.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key when `api_key` is unset.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

impl ModelConfig {
    /// Load configuration, trying `<workspace>/llm_config.json` then
    /// `./llm_config.json`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no file is found or the file does
    /// not parse.
    pub fn load(workspace: &Path) -> Result<Self> {
        let candidates = [workspace.join(CONFIG_FILE), PathBuf::from(CONFIG_FILE)];
        for path in &candidates {
            if path.is_file() {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ForgeError::config_with_path(format!("failed to read: {e}"), path.clone())
                })?;
                let config: Self = serde_json::from_str(&raw).map_err(|e| {
                    ForgeError::config_with_path(format!("failed to parse: {e}"), path.clone())
                })?;
                config.validate()?;
                return Ok(config);
            }
        }
        Err(ForgeError::config(format!(
            "{CONFIG_FILE} not found in {} or the current directory",
            workspace.display()
        )))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() || !self.base_url.starts_with("http") {
            return Err(ForgeError::config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.model.is_empty() {
            return Err(ForgeError::config("model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ForgeError::config(format!(
                "temperature must be in [0.0, 2.0], got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Resolve the API key: inline value first, then the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither source yields a key.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(ForgeError::config(format!(
                "no API key: set \"api_key\" in {CONFIG_FILE} or export {}",
                self.api_key_env
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.api_key_env, "DEEPSEEK_API_KEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            r#"{"base_url": "http://localhost:8000/v1", "model": "local", "api_key": "k"}"#,
        )
        .unwrap();

        let config = ModelConfig::load(temp.path()).unwrap();
        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert_eq!(config.model, "local");
        // Missing fields fall back to defaults.
        assert!((config.temperature - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = ModelConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, ForgeError::Config { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "{not json").unwrap();
        let err = ModelConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, ForgeError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut config = ModelConfig::default();
        config.base_url = "ftp://nope".to_string();
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.model = String::new();
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_api_key_prefers_inline() {
        let config = ModelConfig {
            api_key: Some("inline-key".to_string()),
            api_key_env: "MODFORGE_TEST_NO_SUCH_VAR".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "inline-key");
    }

    #[test]
    fn test_resolve_api_key_missing_everywhere() {
        let config = ModelConfig {
            api_key: None,
            api_key_env: "MODFORGE_TEST_NO_SUCH_VAR".to_string(),
            ..ModelConfig::default()
        };
        let err = config.resolve_api_key().unwrap_err();
        assert!(err.to_string().contains("MODFORGE_TEST_NO_SUCH_VAR"));
    }
}
