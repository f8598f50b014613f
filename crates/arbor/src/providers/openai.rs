//! Adapter for the OpenAI responses API.
//!
//! Requests are stateless (`store: false`), so the whole history is replayed
//! as input items on every call. Thinking parts are dropped on replay; the
//! API has no slot for another turn's reasoning.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::ProviderError;
use crate::models::history::{self, HistoryEntry};
use crate::models::part::{BlobKind, Part};
use crate::models::role::Role;
use crate::providers::base::{Agent, AgentOptions, ToolSpec};
use crate::providers::configs::OpenAiConfig;
use crate::providers::sse::{SseEvent, SseParser};
use crate::providers::util;

pub struct OpenAiAgent {
    client: Client,
    host: String,
    api_key: String,
    model: String,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    history: Vec<HistoryEntry>,
    history_path: Option<PathBuf>,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiConfig, options: AgentOptions) -> Result<Self> {
        let api_key = config.api_key.resolve("openai")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        let history = match &options.history_path {
            Some(path) => history::load_history(path)?,
            None => Vec::new(),
        };
        Ok(OpenAiAgent {
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
            "model": self.model,
            "stream": true,
            "store": false,
            "input": input_from_history(&self.history),
        });
        if !self.system_prompt.is_empty() {
            body["instructions"] = json!(self.system_prompt);
        }
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(
                self.tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

impl Agent for OpenAiAgent {
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
                .post(format!("{}/v1/responses", self.host))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            let response = util::check_status(response).await?;

            let mut parser = SseParser::new();
            let mut processor = OutputProcessor::new();
            let mut recorded: Vec<HistoryEntry> = Vec::new();
            let mut body_stream = response.bytes_stream();
            let mut done = false;

            while !done {
                let Some(chunk) = body_stream.next().await else {
                    break;
                };
                let chunk = chunk?;
                for sse_event in parser.feed(&chunk) {
                    match processor.process(&sse_event)? {
                        Step::None => {}
                        Step::Emit(part) => yield part,
                        Step::Close { emit, record } => {
                            // Into history as each item closes, so a stream
                            // that dies later keeps what already finished.
                            let entry = HistoryEntry::assistant(record);
                            self.history.push(entry.clone());
                            recorded.push(entry);
                            if let Some(part) = emit {
                                yield part;
                            }
                        }
                        Step::Done => {
                            done = true;
                        }
                    }
                }
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

// ---- history replay ----

/// The canonical JSON wrapper for a tool result on the wire.
pub fn encode_function_output(response: &crate::models::part::FunctionResponse) -> String {
    let payload = match &response.error {
        Some(error) => json!({
            "success": false,
            "error_message": error,
        }),
        None => json!({
            "success": true,
            "response": response.response,
        }),
    };
    payload.to_string()
}

fn input_from_history(history: &[HistoryEntry]) -> Vec<Value> {
    let mut items = Vec::new();
    for entry in history {
        match &entry.part {
            Part::Text { thought: true, .. } => continue,
            Part::Text { text, .. } => {
                let (role, content_type) = match entry.role {
                    Role::User => ("user", "input_text"),
                    Role::Assistant => ("assistant", "output_text"),
                };
                items.push(json!({
                    "role": role,
                    "content": [{"type": content_type, "text": text}],
                }));
            }
            Part::FunctionCall(call) => items.push(json!({
                "type": "function_call",
                "call_id": call.id,
                "name": call.name,
                "arguments": Value::Object(call.args.clone()).to_string(),
            })),
            Part::FunctionResponse(response) => items.push(json!({
                "type": "function_call_output",
                "call_id": response.id,
                "output": encode_function_output(response),
            })),
            Part::Blob(blob) if blob.kind == BlobKind::Image => items.push(json!({
                "role": "user",
                "content": [{
                    "type": "input_image",
                    "image_url": format!("data:{};base64,{}", blob.mime_type, blob.data),
                }],
            })),
            Part::Blob(blob) => items.push(json!({
                "role": "user",
                "content": [{
                    "type": "input_text",
                    "text": format!("[attached file: {}]", blob.filename.as_deref().unwrap_or("unnamed")),
                }],
            })),
            Part::FileRef(file) => items.push(json!({
                "role": "user",
                "content": [{
                    "type": "input_text",
                    "text": format!("[file reference: {}]", file.url),
                }],
            })),
        }
    }
    items
}

// ---- stream processing ----

#[derive(Debug)]
enum Step {
    None,
    Emit(Part),
    Close { emit: Option<Part>, record: Part },
    Done,
}

#[derive(Debug, Deserialize)]
struct ItemEvent {
    item: OutputItem,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Message {
        #[serde(default)]
        content: Vec<MessageContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    OutputText {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaEvent {
    delta: String,
}

#[derive(Debug, Deserialize)]
struct TextDoneEvent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct FailureEvent {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<Value>,
}

/// Accumulates the in-flight function call while forwarding text deltas.
#[derive(Debug, Default)]
struct OutputProcessor {
    pending_call: Option<(String, String, String)>,
    reasoning: String,
}

impl OutputProcessor {
    fn new() -> Self {
        OutputProcessor::default()
    }

    fn process(&mut self, event: &SseEvent) -> Result<Step, ProviderError> {
        let kind = event.event.as_deref().unwrap_or("");
        match kind {
            "response.output_item.added" => {
                let added: ItemEvent = serde_json::from_str(&event.data)?;
                if let OutputItem::FunctionCall { call_id, name, arguments } = added.item {
                    if self.pending_call.is_some() {
                        return Err(ProviderError::protocol(
                            "function_call item added while another is in flight",
                        ));
                    }
                    self.pending_call = Some((call_id, name, arguments));
                }
                Ok(Step::None)
            }
            "response.function_call_arguments.delta" => {
                let delta: DeltaEvent = serde_json::from_str(&event.data)?;
                let Some((_, _, buffer)) = &mut self.pending_call else {
                    return Err(ProviderError::protocol(
                        "function_call arguments delta with no call in flight",
                    ));
                };
                buffer.push_str(&delta.delta);
                Ok(Step::None)
            }
            "response.output_text.delta" => {
                let delta: DeltaEvent = serde_json::from_str(&event.data)?;
                Ok(Step::Emit(Part::text(delta.delta)))
            }
            "response.reasoning_text.delta" => {
                let delta: DeltaEvent = serde_json::from_str(&event.data)?;
                self.reasoning.push_str(&delta.delta);
                Ok(Step::Emit(Part::thought(delta.delta)))
            }
            "response.reasoning_text.done" => {
                let done: TextDoneEvent = serde_json::from_str(&event.data)?;
                let text = if done.text.is_empty() {
                    std::mem::take(&mut self.reasoning)
                } else {
                    self.reasoning.clear();
                    done.text
                };
                Ok(Step::Close {
                    emit: None,
                    record: Part::thought(text),
                })
            }
            "response.output_item.done" => {
                let done: ItemEvent = serde_json::from_str(&event.data)?;
                self.close_item(done.item)
            }
            "response.completed" => Ok(Step::Done),
            "response.failed" | "error" => {
                let failure: FailureEvent = serde_json::from_str(&event.data)?;
                let message = failure
                    .message
                    .or_else(|| {
                        failure
                            .response
                            .as_ref()
                            .and_then(|r| r.pointer("/error/message"))
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "response failed".to_string());
                Err(ProviderError::protocol(message))
            }
            other => {
                debug!(event = other, "ignoring unrecognized stream event");
                Ok(Step::None)
            }
        }
    }

    fn close_item(&mut self, item: OutputItem) -> Result<Step, ProviderError> {
        match item {
            OutputItem::FunctionCall { call_id, name, arguments } => {
                let buffered = self
                    .pending_call
                    .take()
                    .map(|(_, _, buffer)| buffer)
                    .unwrap_or_default();
                // The done item usually carries the complete arguments; fall
                // back to the accumulated deltas when it does not.
                let raw = if arguments.trim().is_empty() {
                    buffered
                } else {
                    arguments
                };
                let args = parse_arguments(&raw)?;
                let part = Part::function_call(call_id, name, args);
                Ok(Step::Close {
                    emit: Some(part.clone()),
                    record: part,
                })
            }
            OutputItem::Message { content } => {
                let text: String = content
                    .into_iter()
                    .filter_map(|block| match block {
                        MessageContent::OutputText { text } => Some(text),
                        MessageContent::Other => None,
                    })
                    .collect();
                Ok(Step::Close {
                    emit: None,
                    record: Part::text(text),
                })
            }
            OutputItem::Other => Ok(Step::None),
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProviderError::protocol(
            "function call arguments decoded to a non-object",
        )),
    }
}
