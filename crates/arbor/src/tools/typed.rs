//! Strongly typed tools.
//!
//! Implement [`TypedHandler`] with concrete request and response types and
//! wrap it in [`TypedTool`]; argument decoding, schema derivation, and
//! response encoding are handled here so handlers stay plain Rust.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{ToolContext, ToolDefinition, ToolOutput};
use crate::errors::ToolError;

#[async_trait]
pub trait TypedHandler: Send + Sync {
    type Request: DeserializeOwned + JsonSchema + Send;
    type Response: Serialize + JsonSchema;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(
        &self,
        cx: &ToolContext,
        request: Self::Request,
    ) -> Result<Self::Response, ToolError>;
}

pub struct TypedTool<H>(pub H);

#[async_trait]
impl<H: TypedHandler> ToolDefinition for TypedTool<H> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn request_schema(&self) -> Value {
        schema_of::<H::Request>()
    }

    fn response_schema(&self) -> Value {
        let mut schema = wrap_scalar_schema(schema_of::<H::Response>());
        // Any tool can fail; the failure message shares the response shape.
        if let Some(properties) = schema
            .as_object_mut()
            .and_then(|s| s.get_mut("properties"))
            .and_then(Value::as_object_mut)
        {
            properties.insert("error".to_string(), json!({"type": "string"}));
        }
        schema
    }

    async fn invoke(
        &self,
        cx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let request: H::Request = serde_json::from_value(Value::Object(args))
            .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
        let response = self.0.run(cx, request).await?;
        let encoded =
            serde_json::to_value(response).map_err(|err| ToolError::Failed(err.to_string()))?;
        Ok(ToolOutput::value(wrap_scalar_value(encoded)))
    }
}

fn schema_of<T: JsonSchema>() -> Value {
    let mut generator = schemars::SchemaGenerator::default();
    generator.root_schema_for::<T>().to_value()
}

/// Backends expect object-shaped results, so scalar and array responses are
/// wrapped under a `value` key. The schema and the runtime value agree.
fn wrap_scalar_schema(schema: Value) -> Value {
    let is_object = schema.get("type").and_then(Value::as_str) == Some("object");
    if is_object {
        schema
    } else {
        json!({
            "type": "object",
            "properties": {"value": schema},
        })
    }
}

fn wrap_scalar_value(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({"value": value})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoRequest {
        text: String,
        #[serde(default)]
        repeat: Option<u32>,
    }

    #[derive(Debug, Serialize, JsonSchema)]
    struct EchoResponse {
        echoed: String,
    }

    struct Echo;

    #[async_trait]
    impl TypedHandler for Echo {
        type Request = EchoRequest;
        type Response = EchoResponse;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input text."
        }

        async fn run(
            &self,
            _cx: &ToolContext,
            request: Self::Request,
        ) -> Result<Self::Response, ToolError> {
            let count = request.repeat.unwrap_or(1) as usize;
            Ok(EchoResponse {
                echoed: request.text.repeat(count),
            })
        }
    }

    struct Countdown;

    #[async_trait]
    impl TypedHandler for Countdown {
        type Request = EchoRequest;
        type Response = Vec<u32>;

        fn name(&self) -> &str {
            "countdown"
        }

        fn description(&self) -> &str {
            "Returns a list."
        }

        async fn run(&self, _cx: &ToolContext, _request: Self::Request) -> Result<Self::Response, ToolError> {
            Ok(vec![3, 2, 1])
        }
    }

    fn cx() -> ToolContext {
        ToolContext::new(".")
    }

    #[test]
    fn request_schema_names_properties() {
        let tool = TypedTool(Echo);
        let schema = tool.request_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["text"].is_object());
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .contains(&json!("text")));
    }

    #[test]
    fn response_schema_gains_error_property() {
        let tool = TypedTool(Echo);
        let schema = tool.response_schema();
        assert_eq!(schema["properties"]["error"]["type"], "string");
        assert!(schema["properties"]["echoed"].is_object());
    }

    #[test]
    fn non_object_response_schema_is_wrapped() {
        let tool = TypedTool(Countdown);
        let schema = tool.response_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["value"]["type"], "array");
    }

    #[tokio::test]
    async fn invoke_decodes_and_encodes() {
        let tool = TypedTool(Echo);
        let mut args = Map::new();
        args.insert("text".to_string(), json!("ab"));
        args.insert("repeat".to_string(), json!(2));
        let output = tool.invoke(&cx(), args).await.unwrap();
        assert_eq!(output.response["echoed"], "abab");
        assert!(output.parts.is_empty());
    }

    #[tokio::test]
    async fn non_object_response_value_is_wrapped() {
        let tool = TypedTool(Countdown);
        let mut args = Map::new();
        args.insert("text".to_string(), json!("x"));
        let output = tool.invoke(&cx(), args).await.unwrap();
        assert_eq!(output.response["value"], json!([3, 2, 1]));
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_not_failed() {
        let tool = TypedTool(Echo);
        let mut args = Map::new();
        args.insert("text".to_string(), json!(42));
        let err = tool.invoke(&cx(), args).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid() {
        let tool = TypedTool(Echo);
        let err = tool.invoke(&cx(), Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
