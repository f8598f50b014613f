use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProviderError;
use crate::models::part::Part;

/// A tool as advertised to a model backend.
///
/// `input_schema` is a JSON Schema object describing the arguments. Each
/// adapter reshapes this into its own wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new<N: Into<String>, D: Into<String>>(name: N, description: D, input_schema: Value) -> Self {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Everything an adapter needs beyond its provider config.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub system_prompt: String,
    pub tools: Vec<ToolSpec>,
    /// When set, prior turns are loaded from this file at construction and
    /// each completed exchange is appended to it.
    pub history_path: Option<std::path::PathBuf>,
}

/// A stateful connection to one model backend.
///
/// Implementations append `parts` to their history, issue one request, and
/// yield parts as the backend produces them. Text and thinking content
/// arrives incrementally (each yielded part is a fragment); function calls
/// arrive whole. The assistant's output is recorded in the adapter's history
/// as complete parts, so callers re-invoke with only the new user parts.
pub trait Agent: Send {
    fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
    ) -> BoxStream<'_, Result<Part, ProviderError>>;
}
