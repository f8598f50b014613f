//! Adapter for the Gemini generateContent API.
//!
//! This backend is called without streaming; the single response body is
//! decomposed into parts and yielded in order, so callers see the same
//! stream shape as the other adapters with coarser granularity.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::try_stream;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::ProviderError;
use crate::models::history::{self, HistoryEntry};
use crate::models::part::{BlobKind, Part};
use crate::models::role::Role;
use crate::providers::base::{Agent, AgentOptions, ToolSpec};
use crate::providers::configs::GeminiConfig;
use crate::providers::openai::encode_function_output;
use crate::providers::util;

pub struct GeminiAgent {
    client: Client,
    host: String,
    api_key: String,
    model: String,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    history: Vec<HistoryEntry>,
    history_path: Option<PathBuf>,
}

impl GeminiAgent {
    pub fn new(config: GeminiConfig, options: AgentOptions) -> Result<Self> {
        let api_key = config.api_key.resolve("gemini")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        let history = match &options.history_path {
            Some(path) => history::load_history(path)?,
            None => Vec::new(),
        };
        Ok(GeminiAgent {
            client,
            host: config.host,
            api_key,
            model: config.model,
            system_prompt: options.system_prompt,
            tools: options.tools,
            history,
            history_path: options.history_path,
        })
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn build_request(&self) -> Value {
        let mut body = json!({
            "contents": contents_from_history(&self.history),
        });
        if !self.system_prompt.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": self.system_prompt}]});
        }
        if !self.tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": self.tools.iter().map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                }).collect::<Vec<_>>(),
            }]);
        }
        body
    }
}

impl Agent for GeminiAgent {
    fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
    ) -> BoxStream<'_, Result<Part, ProviderError>> {
        Box::pin(try_stream! {
            let sent: Vec<HistoryEntry> = parts.into_iter().map(HistoryEntry::user).collect();
            self.history.extend(sent.iter().cloned());

            let body = self.build_request();
            let response = self
                .client
                .post(format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.host, self.model
                ))
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await?;
            let response = util::check_status(response).await?;
            let generated: GenerateResponse = serde_json::from_str(&response.text().await?)?;

            let parts = decompose(generated)?;
            let mut recorded: Vec<HistoryEntry> = Vec::new();
            for part in parts {
                let entry = HistoryEntry::assistant(part.clone());
                self.history.push(entry.clone());
                recorded.push(entry);
                yield part;
            }

            if let Some(path) = &self.history_path {
                let mut delta = sent;
                delta.extend(recorded);
                history::append_history(path, &delta)
                    .map_err(|err| ProviderError::Storage(err.to_string()))?;
            }
        })
    }
}

// ---- response decomposition ----

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<WireCall>,
}

#[derive(Debug, Deserialize)]
struct WireCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

/// The API returns function calls without identifiers, so one is minted per
/// call to keep the shared correlation contract.
fn decompose(response: GenerateResponse) -> Result<Vec<Part>, ProviderError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let detail = response
            .prompt_feedback
            .map(|feedback| feedback.to_string())
            .unwrap_or_else(|| "response contained no candidates".to_string());
        return Err(ProviderError::protocol(detail));
    };
    let Some(content) = candidate.content else {
        return Err(ProviderError::protocol("candidate contained no content"));
    };

    let mut parts = Vec::new();
    for wire in content.parts {
        if let Some(call) = wire.function_call {
            parts.push(Part::function_call(
                Uuid::new_v4().to_string(),
                call.name,
                call.args,
            ));
        } else if let Some(text) = wire.text {
            if wire.thought {
                parts.push(Part::thought(text));
            } else {
                parts.push(Part::text(text));
            }
        }
    }
    Ok(parts)
}

// ---- history replay ----

fn contents_from_history(history: &[HistoryEntry]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();
    let mut current_role: Option<Role> = None;
    let mut current_parts: Vec<Value> = Vec::new();

    let flush = |role: Option<Role>, parts: &mut Vec<Value>, out: &mut Vec<Value>| {
        if let Some(role) = role {
            if !parts.is_empty() {
                out.push(json!({
                    "role": match role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    "parts": std::mem::take(parts),
                }));
            }
        }
    };

    for entry in history {
        let Some(wire) = wire_part(&entry.part) else {
            continue;
        };
        if current_role != Some(entry.role) {
            flush(current_role, &mut current_parts, &mut contents);
            current_role = Some(entry.role);
        }
        current_parts.push(wire);
    }
    flush(current_role, &mut current_parts, &mut contents);
    contents
}

fn wire_part(part: &Part) -> Option<Value> {
    match part {
        // Thinking content cannot be replayed to this backend.
        Part::Text { thought: true, .. } => None,
        Part::Text { text, .. } => Some(json!({"text": text})),
        Part::FunctionCall(call) => Some(json!({
            "functionCall": {"name": call.name, "args": call.args},
        })),
        Part::FunctionResponse(response) => Some(json!({
            "functionResponse": {
                "name": response.name,
                "response": serde_json::from_str::<Value>(&encode_function_output(response))
                    .unwrap_or(Value::Null),
            },
        })),
        Part::Blob(blob) if blob.kind == BlobKind::Image => Some(json!({
            "inlineData": {"mimeType": blob.mime_type, "data": blob.data},
        })),
        Part::Blob(blob) => Some(json!({
            "text": format!("[attached file: {}]", blob.filename.as_deref().unwrap_or("unnamed")),
        })),
        Part::FileRef(file) => Some(json!({
            "fileData": {"fileUri": file.url, "mimeType": file.mime_type},
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::part::FunctionResponse;

    #[test]
    fn response_decomposes_into_ordered_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"Let me check.","thought":true},
                {"text":"Sure."},
                {"functionCall":{"name":"read_file","args":{"path":"a.rs"}}}
            ]}}]}"#,
        )
        .unwrap();
        let parts = decompose(response).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].is_thought());
        assert_eq!(parts[1].as_text(), Some("Sure."));
        let call = parts[2].as_function_call().unwrap();
        assert_eq!(call.name, "read_file");
        assert!(!call.id.is_empty());
    }

    #[test]
    fn minted_call_ids_are_unique() {
        let make = || {
            decompose(
                serde_json::from_str(
                    r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"ls","args":{}}}]}}]}"#,
                )
                .unwrap(),
            )
            .unwrap()
        };
        let a = make();
        let b = make();
        assert_ne!(
            a[0].as_function_call().unwrap().id,
            b[0].as_function_call().unwrap().id
        );
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = decompose(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn replay_groups_roles_and_wraps_function_response() {
        let history = vec![
            HistoryEntry::user(Part::text("hi")),
            HistoryEntry::assistant(Part::function_call("c1", "ls", Map::new())),
            HistoryEntry::user(Part::FunctionResponse(FunctionResponse::ok(
                "c1",
                "ls",
                json!(["a.rs"]),
                vec![],
            ))),
        ];
        let contents = contents_from_history(&history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        let wrapped = &contents[2]["parts"][0]["functionResponse"]["response"];
        assert_eq!(wrapped["success"], json!(true));
        assert_eq!(wrapped["response"], json!(["a.rs"]));
    }

    #[test]
    fn thoughts_are_dropped_on_replay() {
        let history = vec![
            HistoryEntry::assistant(Part::thought("hmm")),
            HistoryEntry::assistant(Part::text("answer")),
        ];
        let contents = contents_from_history(&history);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 1);
    }
}
