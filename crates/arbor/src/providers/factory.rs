use anyhow::Result;

use super::anthropic::AnthropicAgent;
use super::base::{Agent, AgentOptions};
use super::configs::ProviderConfig;
use super::gemini::GeminiAgent;
use super::openai::OpenAiAgent;

/// Constructs the adapter for a backend config.
pub fn new_agent(config: ProviderConfig, options: AgentOptions) -> Result<Box<dyn Agent>> {
    Ok(match config {
        ProviderConfig::Anthropic(config) => Box::new(AnthropicAgent::new(config, options)?),
        ProviderConfig::OpenAi(config) => Box::new(OpenAiAgent::new(config, options)?),
        ProviderConfig::Gemini(config) => Box::new(GeminiAgent::new(config, options)?),
    })
}
