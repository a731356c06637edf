//! Configuration for the document engine and server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::document::core::errors::{DocError, DocResult};

/// Environment variable pointing at an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "LIVEDOC_CONFIG";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Model provider settings.
    pub llm: LlmConfig,
    /// Generation pipeline settings.
    pub streaming: StreamingConfig,
    /// Token estimation settings.
    pub tokens: TokenConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load from `LIVEDOC_CONFIG` (if set) and apply environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn load() -> DocResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> DocResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `LIVEDOC_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("LIVEDOC_DB_PATH") {
            self.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(port) = std::env::var("LIVEDOC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("LIVEDOC_OLLAMA_URL") {
            self.llm.ollama_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("LIVEDOC_OPENAI_URL") {
            self.llm.openai_base_url = Some(url);
        }
        if let Ok(model) = std::env::var("LIVEDOC_MODEL") {
            self.llm.default_model = model;
        }
        if let Ok(provider) = std::env::var("LIVEDOC_PROVIDER") {
            self.llm.default_provider = provider;
        }
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> DocResult<()> {
        if self.streaming.change_capacity == 0 {
            return Err(DocError::InvalidConfig(
                "streaming.change_capacity must be > 0".to_string(),
            ));
        }

        if self.streaming.continue_prompt.trim().is_empty() {
            return Err(DocError::InvalidConfig(
                "streaming.continue_prompt must not be empty".to_string(),
            ));
        }

        if self.tokens.chars_per_token == 0 {
            return Err(DocError::InvalidConfig(
                "tokens.chars_per_token must be > 0".to_string(),
            ));
        }

        if self.tokens.default_context_window == 0 {
            return Err(DocError::InvalidConfig(
                "tokens.default_context_window must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.tokens.warn_ratio) {
            return Err(DocError::InvalidConfig(
                "tokens.warn_ratio must be within [0, 1]".to_string(),
            ));
        }

        for (model, window) in &self.tokens.context_windows {
            if *window == 0 {
                return Err(DocError::InvalidConfig(format!(
                    "context window for {model} must be > 0"
                )));
            }
        }

        if let Some(base_url) = &self.llm.ollama_base_url {
            Url::parse(base_url)?;
        }

        if let Some(base_url) = &self.llm.openai_base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("livedoc.sqlite"),
        }
    }
}

/// Model provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when a request names none.
    pub default_provider: String,
    /// Model used when a request names none.
    pub default_model: String,
    /// Optional custom Ollama URL.
    pub ollama_base_url: Option<String>,
    /// Optional custom OpenAI-compatible URL.
    pub openai_base_url: Option<String>,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional max tokens.
    pub max_tokens: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_string(),
            default_model: "llama3.1:8b".to_string(),
            ollama_base_url: None,
            openai_base_url: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Generation pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// System preamble placed before the block messages.
    pub system_preamble: String,
    /// Synthetic user turn appended when the document ends with the assistant.
    pub continue_prompt: String,
    /// Buffered change notifications per subscriber.
    pub change_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            system_preamble: "You are a helpful assistant. The conversation is a living \
                document: earlier turns may have been edited. Answer in Markdown."
                .to_string(),
            continue_prompt: "Continue".to_string(),
            change_capacity: 256,
        }
    }
}

/// Token estimation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Characters counted as one token.
    pub chars_per_token: usize,
    /// Context window for models without an explicit entry.
    pub default_context_window: u64,
    /// Context window overrides by model id.
    pub context_windows: HashMap<String, u64>,
    /// Fraction of the window at which usage becomes a warning.
    pub warn_ratio: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            default_context_window: 8_192,
            context_windows: HashMap::new(),
            warn_ratio: 0.8,
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.tokens.warn_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.llm.ollama_base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config
            .tokens
            .context_windows
            .insert("tiny".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "server": { "port": 8080 } }"#).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.streaming.continue_prompt, "Continue");
        assert_eq!(config.tokens.chars_per_token, 4);
    }
}
