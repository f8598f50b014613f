//! TOML configuration.
//!
//! ```toml
//! default_backend = "claude"
//! system_prompt = "You are a careful coding assistant."
//!
//! [[backend]]
//! name = "claude"
//! kind = "anthropic"
//! model = "claude-sonnet-4"
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [[mcp]]
//! name = "files"
//! transport = "stdio"
//! command = "mcp-files"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::providers::configs::{
    AnthropicConfig, ApiKey, GeminiConfig, OpenAiConfig, ProviderConfig,
    ANTHROPIC_DEFAULT_HOST, GEMINI_DEFAULT_HOST, OPENAI_DEFAULT_HOST,
};
use crate::tools::mcp::McpServerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendConfig>,
    #[serde(default, rename = "mcp")]
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
    pub model: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    #[serde(flatten)]
    pub api_key: ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Anthropic,
    OpenAi,
    Gemini,
}

impl Config {
    /// Conventional location: `<user config dir>/arbor/config.toml`.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("arbor").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Picks a backend by name, falling back to `default_backend`, then to
    /// the first entry.
    pub fn select_backend(&self, name: Option<&str>) -> Result<&BackendConfig, ConfigError> {
        let wanted = name
            .map(str::to_string)
            .or_else(|| self.default_backend.clone());
        match wanted {
            Some(wanted) => self
                .backends
                .iter()
                .find(|b| b.name == wanted)
                .ok_or(ConfigError::UnknownBackend(wanted)),
            None => self
                .backends
                .first()
                .ok_or_else(|| ConfigError::UnknownBackend("<none configured>".to_string())),
        }
    }
}

impl BackendConfig {
    /// Expands the file entry into a full provider config.
    pub fn provider_config(&self) -> ProviderConfig {
        let api_key = self.api_key.clone();
        match self.kind {
            BackendKind::Anthropic => {
                let mut config = AnthropicConfig::new(api_key, &self.model);
                config.host = self
                    .host
                    .clone()
                    .unwrap_or_else(|| ANTHROPIC_DEFAULT_HOST.to_string());
                config.max_tokens = self.max_tokens;
                config.thinking_budget = self.thinking_budget;
                ProviderConfig::Anthropic(config)
            }
            BackendKind::OpenAi => {
                let mut config = OpenAiConfig::new(api_key, &self.model);
                config.host = self
                    .host
                    .clone()
                    .unwrap_or_else(|| OPENAI_DEFAULT_HOST.to_string());
                ProviderConfig::OpenAi(config)
            }
            BackendKind::Gemini => {
                let mut config = GeminiConfig::new(api_key, &self.model);
                config.host = self
                    .host
                    .clone()
                    .unwrap_or_else(|| GEMINI_DEFAULT_HOST.to_string());
                ProviderConfig::Gemini(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_backend = "claude"
        system_prompt = "Be terse."

        [[backend]]
        name = "claude"
        kind = "anthropic"
        model = "claude-sonnet-4"
        api_key_env = "ANTHROPIC_API_KEY"

        [[backend]]
        name = "gpt"
        kind = "openai"
        model = "gpt-5"
        api_key = "sk-inline"
        host = "https://proxy.internal"

        [[mcp]]
        name = "files"
        transport = "stdio"
        command = "mcp-files"
        args = ["--root", "."]
    "#;

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.default_backend.as_deref(), Some("claude"));
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].name, "files");
    }

    #[test]
    fn backend_selection_prefers_explicit_then_default() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.select_backend(Some("gpt")).unwrap().name, "gpt");
        assert_eq!(config.select_backend(None).unwrap().name, "claude");
        assert!(matches!(
            config.select_backend(Some("nope")),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn host_override_reaches_provider_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let backend = config.select_backend(Some("gpt")).unwrap();
        match backend.provider_config() {
            ProviderConfig::OpenAi(openai) => {
                assert_eq!(openai.host, "https://proxy.internal");
                assert_eq!(openai.model, "gpt-5");
            }
            other => panic!("expected openai config, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
