use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request from the model to invoke a tool.
///
/// `id` correlates the call with its eventual [`FunctionResponse`]; `args`
/// is always a decoded JSON object, never a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// The result of a tool invocation, sent back to the model.
///
/// Exactly one of `response` or `error` is authoritative. An error response
/// is still transmitted to the model (not treated as a protocol failure) so
/// it can self-correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,
    /// Supplementary content such as returned images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionResponse {
    pub fn ok<S: Into<String>, N: Into<String>>(
        id: S,
        name: N,
        response: Value,
        parts: Vec<Part>,
    ) -> Self {
        FunctionResponse {
            id: id.into(),
            name: name.into(),
            response,
            parts,
            error: None,
        }
    }

    pub fn err<S: Into<String>, N: Into<String>, E: Into<String>>(id: S, name: N, error: E) -> Self {
        FunctionResponse {
            id: id.into(),
            name: name.into(),
            response: Value::Null,
            parts: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    Image,
    Audio,
    File,
}

/// An attached binary payload, base64-encoded for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub kind: BlobKind,
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Blob {
    pub fn new<M: Into<String>>(kind: BlobKind, data: &[u8], mime_type: M) -> Self {
        Blob {
            kind,
            data: BASE64.encode(data),
            mime_type: mime_type.into(),
            filename: None,
        }
    }

    pub fn with_filename<F: Into<String>>(mut self, filename: F) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// A reference to a remote file instead of inlined bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub mime_type: String,
}

/// The atomic unit of conversation.
///
/// The enum makes the one-payload invariant structural: a part is text
/// (optionally flagged as thinking content), a function call, a function
/// response, an inline blob, or a remote file reference, never a mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
        /// Opaque provenance token some providers require on replay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking_signature: Option<String>,
    },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    Blob(Blob),
    FileRef(FileRef),
}

impl Part {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Part::Text {
            text: text.into(),
            thought: false,
            thinking_signature: None,
        }
    }

    pub fn thought<S: Into<String>>(text: S) -> Self {
        Part::Text {
            text: text.into(),
            thought: true,
            thinking_signature: None,
        }
    }

    pub fn signed_thought<S: Into<String>, G: Into<String>>(text: S, signature: G) -> Self {
        Part::Text {
            text: text.into(),
            thought: true,
            thinking_signature: Some(signature.into()),
        }
    }

    pub fn function_call<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        args: Map<String, Value>,
    ) -> Self {
        Part::FunctionCall(FunctionCall {
            id: id.into(),
            name: name.into(),
            args,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Text { thought: true, .. })
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_function_response(&self) -> Option<&FunctionResponse> {
        match self {
            Part::FunctionResponse(response) => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_part_round_trip() {
        let part = Part::text("Hello, world!");
        let encoded = serde_json::to_string(&part).unwrap();
        let decoded: Part = serde_json::from_str(&encoded).unwrap();
        assert_eq!(part, decoded);
        // Plain text omits the thought flag on the wire.
        assert!(!encoded.contains("thought"));
    }

    #[test]
    fn thought_part_keeps_signature() {
        let part = Part::signed_thought("reasoning...", "sig-abc");
        let encoded = serde_json::to_value(&part).unwrap();
        assert_eq!(encoded["thought"], json!(true));
        assert_eq!(encoded["thinking_signature"], json!("sig-abc"));
        let decoded: Part = serde_json::from_value(encoded).unwrap();
        assert_eq!(part, decoded);
    }

    #[test]
    fn function_call_round_trip() {
        let mut args = Map::new();
        args.insert("q".to_string(), json!("x"));
        let part = Part::function_call("c1", "search", args);
        let decoded: Part = serde_json::from_str(&serde_json::to_string(&part).unwrap()).unwrap();
        let call = decoded.as_function_call().unwrap();
        assert_eq!(call.id, "c1");
        assert_eq!(call.name, "search");
        assert_eq!(call.args["q"], json!("x"));
    }

    #[test]
    fn response_without_error_round_trips_value() {
        let response = FunctionResponse::ok("c1", "search", json!({"hits": 3}), vec![]);
        let decoded: FunctionResponse =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(decoded.response, json!({"hits": 3}));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn response_error_never_silently_dropped() {
        let response = FunctionResponse::err("c1", "rm", "declined by user");
        let decoded: FunctionResponse =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(decoded.error.as_deref(), Some("declined by user"));
        assert!(decoded.response.is_null());
    }

    #[test]
    fn response_carries_supplementary_parts() {
        let blob = Blob::new(BlobKind::Image, b"\x89PNG", "image/png");
        let response = FunctionResponse::ok(
            "c2",
            "screenshot",
            json!({}),
            vec![Part::Blob(blob.clone())],
        );
        let decoded: FunctionResponse =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(decoded.parts.len(), 1);
        match &decoded.parts[0] {
            Part::Blob(decoded_blob) => {
                assert_eq!(decoded_blob.mime_type, "image/png");
                assert_eq!(decoded_blob.decode().unwrap(), b"\x89PNG");
            }
            other => panic!("expected blob, got {other:?}"),
        }
        assert_eq!(blob.kind, BlobKind::Image);
    }
}
