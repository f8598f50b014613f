//! Tool definitions and dispatch.
//!
//! A tool is anything the model can call: the built-in workspace tools, or
//! a tool proxied from an external server. The [`ToolDefinition`] trait is
//! the seam; [`runner::ToolRunner`] owns the registry and executes calls.

pub mod mcp;
pub mod runner;
pub mod typed;
pub mod workspace;

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::ToolError;
use crate::models::part::Part;
use crate::providers::base::ToolSpec;

/// Ambient state a tool runs against.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root of the workspace. File tools are confined beneath it.
    pub cwd: PathBuf,
}

impl ToolContext {
    pub fn new<P: Into<PathBuf>>(cwd: P) -> Self {
        ToolContext { cwd: cwd.into() }
    }
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Structured result sent back to the model.
    pub response: Value,
    /// Extra content that rides along, such as captured images.
    pub parts: Vec<Part>,
}

impl ToolOutput {
    pub fn value(response: Value) -> Self {
        ToolOutput {
            response,
            parts: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ToolDefinition: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn request_schema(&self) -> Value;

    /// JSON Schema for the response value.
    fn response_schema(&self) -> Value;

    async fn invoke(
        &self,
        cx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError>;
}

/// The advertisement shape for a tool.
pub fn spec_for(tool: &dyn ToolDefinition) -> ToolSpec {
    ToolSpec::new(tool.name(), tool.description(), tool.request_schema())
}
