use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{spec_for, ToolContext, ToolDefinition, ToolOutput};
use crate::errors::ToolError;
use crate::models::part::FunctionCall;
use crate::providers::base::ToolSpec;

/// Hard ceiling on a single tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry and dispatcher for every tool the model may call.
#[derive(Default)]
pub struct ToolRunner {
    tools: HashMap<String, Arc<dyn ToolDefinition>>,
}

impl ToolRunner {
    pub fn new() -> Self {
        ToolRunner::default()
    }

    /// Registers a tool. A name collision is resolved in favor of the later
    /// registration, so register overridable tools first.
    pub fn register(&mut self, tool: Arc<dyn ToolDefinition>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool name collision; later registration wins");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Advertised specs, sorted by name so requests are deterministic.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| spec_for(t.as_ref())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Runs one call to completion, bounded by [`TOOL_TIMEOUT`].
    pub async fn run(
        &self,
        cx: &ToolContext,
        call: &FunctionCall,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        match tokio::time::timeout(TOOL_TIMEOUT, tool.invoke(cx, call.args.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(TOOL_TIMEOUT.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    struct Fixed {
        name: &'static str,
        value: Value,
    }

    #[async_trait]
    impl ToolDefinition for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "fixed"
        }

        fn request_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn response_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(
            &self,
            _cx: &ToolContext,
            _args: Map<String, Value>,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::value(self.value.clone()))
        }
    }

    struct Stuck;

    #[async_trait]
    impl ToolDefinition for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn description(&self) -> &str {
            "never returns"
        }

        fn request_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn response_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(
            &self,
            _cx: &ToolContext,
            _args: Map<String, Value>,
        ) -> Result<ToolOutput, ToolError> {
            futures::future::pending().await
        }
    }

    fn call(name: &str) -> FunctionCall {
        FunctionCall {
            id: "c1".to_string(),
            name: name.to_string(),
            args: Map::new(),
        }
    }

    fn cx() -> ToolContext {
        ToolContext::new(".")
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let runner = ToolRunner::new();
        let err = runner.run(&cx(), &call("nope")).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn later_registration_wins_on_collision() {
        let mut runner = ToolRunner::new();
        runner.register(Arc::new(Fixed {
            name: "dup",
            value: json!({"v": 1}),
        }));
        runner.register(Arc::new(Fixed {
            name: "dup",
            value: json!({"v": 2}),
        }));
        assert_eq!(runner.len(), 1);
        let output = runner.run(&cx(), &call("dup")).await.unwrap();
        assert_eq!(output.response["v"], 2);
    }

    #[tokio::test]
    async fn specs_are_sorted_by_name() {
        let mut runner = ToolRunner::new();
        runner.register(Arc::new(Fixed {
            name: "zeta",
            value: json!({}),
        }));
        runner.register(Arc::new(Fixed {
            name: "alpha",
            value: json!({}),
        }));
        let names: Vec<_> = runner.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tool_times_out() {
        let mut runner = ToolRunner::new();
        runner.register(Arc::new(Stuck));
        let err = runner.run(&cx(), &call("stuck")).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(60)));
        assert!(!err.is_fatal());
    }
}
