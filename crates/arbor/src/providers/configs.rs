use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const GEMINI_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";

/// Credential source for a backend. Either the key is inlined or it names
/// an environment variable to read at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ApiKey {
    pub fn literal<S: Into<String>>(key: S) -> Self {
        ApiKey {
            api_key: Some(key.into()),
            api_key_env: None,
        }
    }

    pub fn from_env<S: Into<String>>(var: S) -> Self {
        ApiKey {
            api_key: None,
            api_key_env: Some(var.into()),
        }
    }

    /// Resolution failure is fatal at construction time. An inline key wins
    /// over the env var when both are present.
    pub fn resolve(&self, backend: &str) -> Result<String, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        if let Some(var) = &self.api_key_env {
            return std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.clone()));
        }
        Err(ConfigError::MissingKey(backend.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub host: String,
    pub api_key: ApiKey,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Token budget for extended thinking. Unset disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl AnthropicConfig {
    pub fn new<M: Into<String>>(api_key: ApiKey, model: M) -> Self {
        AnthropicConfig {
            host: ANTHROPIC_DEFAULT_HOST.to_string(),
            api_key,
            model: model.into(),
            max_tokens: None,
            thinking_budget: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub host: String,
    pub api_key: ApiKey,
    pub model: String,
}

impl OpenAiConfig {
    pub fn new<M: Into<String>>(api_key: ApiKey, model: M) -> Self {
        OpenAiConfig {
            host: OPENAI_DEFAULT_HOST.to_string(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub host: String,
    pub api_key: ApiKey,
    pub model: String,
}

impl GeminiConfig {
    pub fn new<M: Into<String>>(api_key: ApiKey, model: M) -> Self {
        GeminiConfig {
            host: GEMINI_DEFAULT_HOST.to_string(),
            api_key,
            model: model.into(),
        }
    }
}

/// Which backend to construct, with its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    Anthropic(AnthropicConfig),
    OpenAi(OpenAiConfig),
    Gemini(GeminiConfig),
}
