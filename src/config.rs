use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{PromptError, Result};

const APP_DIR: &str = "nexus-prompt";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory for the library database and key file.
    /// Empty means `$XDG_DATA_HOME/nexus-prompt`.
    #[serde(default)]
    pub data_dir: String,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

// -- LLM -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// API key for the chat-completions endpoint.  Prefer `set-key` (stored
    /// encrypted) or the `OPENAI_API_KEY` env var over putting it here.
    #[serde(default)]
    pub api_key: String,

    /// OpenAI-compatible API base URL.
    /// Can be overridden with the `OPENAI_BASE_URL` env var.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    /// Can be overridden with the `OPENAI_MODEL` env var.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token cap (0 = let the API decide).
    #[serde(default)]
    pub max_tokens: usize,

    /// Request timeout in seconds (0 = no timeout).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// -- Generation ----------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Variations requested per generation (1–10).  Only used until the
    /// library has saved settings of its own.
    #[serde(default = "default_count")]
    pub default_count: u8,

    #[serde(default)]
    pub nsfw: bool,

    #[serde(default)]
    pub same_location: bool,
}

// -- Security ------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Passphrase the API-key cipher is derived from.  When empty a random
    /// key file in the data directory is used instead.
    /// Can be overridden with the `NEXUS_ENCRYPTION_KEY` env var.
    #[serde(default)]
    pub encryption_passphrase: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_count() -> u8 {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_count: default_count(),
            nsfw: false,
            same_location: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| PromptError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.generation.default_count) {
            return Err(PromptError::Config(format!(
                "generation.default_count must be between 1 and 10, got {}",
                self.generation.default_count
            )));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(PromptError::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/nexus-prompt/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// The data directory: `data_dir` when set, else `$XDG_DATA_HOME/nexus-prompt/`.
    pub fn data_dir(&self) -> PathBuf {
        if !self.data_dir.is_empty() {
            return PathBuf::from(&self.data_dir);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(APP_DIR)
    }

    /// Base URL with env override and without a trailing slash.
    pub fn base_url(&self) -> String {
        env_or("OPENAI_BASE_URL", &self.llm.base_url)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn model(&self) -> String {
        env_or("OPENAI_MODEL", &self.llm.model)
    }

    /// Passphrase for the secret cipher, if one is configured.
    pub fn encryption_passphrase(&self) -> Option<String> {
        let passphrase = env_or("NEXUS_ENCRYPTION_KEY", &self.security.encryption_passphrase);
        (!passphrase.is_empty()).then_some(passphrase)
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}

/// Non-empty environment variable, falling back to the config value.
fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
