//! Serde shapes for the Anthropic messages API, plus the conversion from
//! shared history entries to request payloads.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::history::HistoryEntry;
use crate::models::part::{BlobKind, Part};
use crate::models::role::Role;
use crate::providers::base::ToolSpec;

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

// ---- incoming stream events ----

#[derive(Debug, Deserialize)]
pub struct BlockStart {
    pub index: usize,
    pub content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct BlockDelta {
    pub index: usize,
    pub delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct BlockStop {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEvent {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

// ---- outgoing request ----

pub fn build_request(
    model: &str,
    max_tokens: u32,
    thinking_budget: Option<u32>,
    system_prompt: &str,
    tools: &[ToolSpec],
    history: &[HistoryEntry],
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": messages_from_history(history),
    });
    if !system_prompt.is_empty() {
        body["system"] = json!(system_prompt);
    }
    if let Some(budget) = thinking_budget {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect(),
        );
    }
    body
}

/// Consecutive entries with the same role collapse into one message, since
/// the API expects alternating roles with multi-block content.
fn messages_from_history(history: &[HistoryEntry]) -> Vec<Value> {
    let mut messages: Vec<Value> = Vec::new();
    let mut current_role: Option<Role> = None;
    let mut current_blocks: Vec<Value> = Vec::new();

    let flush = |role: Option<Role>, blocks: &mut Vec<Value>, out: &mut Vec<Value>| {
        if let Some(role) = role {
            if !blocks.is_empty() {
                out.push(json!({
                    "role": match role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": std::mem::take(blocks),
                }));
            }
        }
    };

    for entry in history {
        if current_role != Some(entry.role) {
            flush(current_role, &mut current_blocks, &mut messages);
            current_role = Some(entry.role);
        }
        current_blocks.push(block_from_part(&entry.part));
    }
    flush(current_role, &mut current_blocks, &mut messages);
    messages
}

fn block_from_part(part: &Part) -> Value {
    match part {
        Part::Text {
            text,
            thought: false,
            ..
        } => json!({"type": "text", "text": text}),
        Part::Text {
            text,
            thought: true,
            thinking_signature,
        } => json!({
            "type": "thinking",
            "thinking": text,
            "signature": thinking_signature.as_deref().unwrap_or(""),
        }),
        Part::FunctionCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.args,
        }),
        Part::FunctionResponse(response) => {
            let mut content = Vec::new();
            match &response.error {
                Some(error) => content.push(json!({"type": "text", "text": error})),
                None => content.push(json!({
                    "type": "text",
                    "text": response.response.to_string(),
                })),
            }
            for extra in &response.parts {
                if let Part::Blob(blob) = extra {
                    if blob.kind == BlobKind::Image {
                        content.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": blob.mime_type,
                                "data": blob.data,
                            },
                        }));
                    }
                }
            }
            json!({
                "type": "tool_result",
                "tool_use_id": response.id,
                "content": content,
                "is_error": response.error.is_some(),
            })
        }
        Part::Blob(blob) if blob.kind == BlobKind::Image => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": blob.mime_type,
                "data": blob.data,
            },
        }),
        Part::Blob(blob) if blob.kind == BlobKind::File => json!({
            "type": "document",
            "source": {
                "type": "base64",
                "media_type": blob.mime_type,
                "data": blob.data,
            },
        }),
        // No native shape for audio here; a textual stand-in keeps history valid.
        Part::Blob(blob) => json!({
            "type": "text",
            "text": format!("[attached file: {}]", blob.filename.as_deref().unwrap_or("unnamed")),
        }),
        Part::FileRef(file) => json!({
            "type": "text",
            "text": format!("[file reference: {}]", file.url),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::part::FunctionResponse;
    use serde_json::Map;

    #[test]
    fn consecutive_roles_collapse_into_one_message() {
        let history = vec![
            HistoryEntry::user(Part::text("hi")),
            HistoryEntry::assistant(Part::text("hello")),
            HistoryEntry::assistant(Part::function_call("c1", "ls", Map::new())),
            HistoryEntry::user(Part::FunctionResponse(FunctionResponse::ok(
                "c1",
                "ls",
                json!(["a"]),
                vec![],
            ))),
        ];
        let messages = messages_from_history(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["is_error"], json!(false));
    }

    #[test]
    fn error_response_marks_is_error() {
        let part = Part::FunctionResponse(FunctionResponse::err("c1", "rm", "nope"));
        let block = block_from_part(&part);
        assert_eq!(block["is_error"], json!(true));
        assert_eq!(block["content"][0]["text"], "nope");
    }

    #[test]
    fn thinking_block_carries_signature() {
        let block = block_from_part(&Part::signed_thought("because", "sig"));
        assert_eq!(block["type"], "thinking");
        assert_eq!(block["signature"], "sig");
    }

    #[test]
    fn request_omits_empty_tools_and_system() {
        let body = build_request(
            "m",
            1024,
            None,
            "",
            &[],
            &[HistoryEntry::user(Part::text("x"))],
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
        assert!(body.get("thinking").is_none());
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn thinking_budget_enables_thinking() {
        let body = build_request(
            "m",
            1024,
            Some(2048),
            "",
            &[],
            &[HistoryEntry::user(Part::text("x"))],
        );
        assert_eq!(body["thinking"]["budget_tokens"], json!(2048));
    }

    #[test]
    fn stream_event_shapes_decode() {
        let start: BlockStart = serde_json::from_str(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"ls","input":{}}}"#,
        )
        .unwrap();
        assert!(matches!(start.content_block, ContentBlock::ToolUse { .. }));

        let delta: BlockDelta = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"p"}}"#,
        )
        .unwrap();
        assert!(matches!(delta.delta, Delta::InputJsonDelta { .. }));

        let unknown: BlockDelta = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"citations_delta","citation":{}}}"#,
        )
        .unwrap();
        assert!(matches!(unknown.delta, Delta::Other));
    }
}
