//! State machine over the messages-API event stream.
//!
//! The API opens one content block at a time, streams deltas for it, then
//! closes it. Text and thinking deltas are forwarded to the caller as they
//! arrive; tool-use input accumulates until the block closes because partial
//! JSON is useless to a dispatcher. The complete block is what gets recorded
//! in history, so a caller sees fragments live but replay sees whole parts.

use serde_json::{Map, Value};
use tracing::debug;

use super::wire::{BlockDelta, BlockStart, BlockStop, ContentBlock, Delta, ErrorEvent};
use crate::errors::ProviderError;
use crate::models::part::Part;
use crate::providers::sse::SseEvent;

#[derive(Debug)]
enum OpenBlock {
    Text(String),
    Thinking { text: String, signature: String },
    ToolUse { id: String, name: String, json: String },
}

/// What one event produced.
#[derive(Debug)]
pub enum Outcome {
    /// Nothing for the caller (ping, message_start, bookkeeping).
    None,
    /// A fragment to forward immediately.
    Emit(Part),
    /// A block closed: `record` is the complete part for history, `emit` is
    /// forwarded too when the content was not already streamed as deltas.
    Close { emit: Option<Part>, record: Part },
    /// The message is finished.
    Done,
}

#[derive(Debug, Default)]
pub struct EventProcessor {
    open: Option<(usize, OpenBlock)>,
}

impl EventProcessor {
    pub fn new() -> Self {
        EventProcessor::default()
    }

    pub fn process(&mut self, event: &SseEvent) -> Result<Outcome, ProviderError> {
        let kind = event.event.as_deref().unwrap_or("");
        match kind {
            "content_block_start" => {
                let start: BlockStart = serde_json::from_str(&event.data)?;
                self.start_block(start)
            }
            "content_block_delta" => {
                let delta: BlockDelta = serde_json::from_str(&event.data)?;
                self.apply_delta(delta)
            }
            "content_block_stop" => {
                let stop: BlockStop = serde_json::from_str(&event.data)?;
                self.close_block(stop)
            }
            "message_stop" => Ok(Outcome::Done),
            "error" => {
                let error: ErrorEvent = serde_json::from_str(&event.data)?;
                Err(ProviderError::protocol(format!(
                    "{}: {}",
                    error.error.kind, error.error.message
                )))
            }
            // message_start carries usage we do not track; ping is keepalive.
            "message_start" | "message_delta" | "ping" => Ok(Outcome::None),
            other => {
                debug!(event = other, "ignoring unrecognized stream event");
                Ok(Outcome::None)
            }
        }
    }

    fn start_block(&mut self, start: BlockStart) -> Result<Outcome, ProviderError> {
        if let Some((index, _)) = &self.open {
            return Err(ProviderError::protocol(format!(
                "content_block_start at index {} while block {} is still open",
                start.index, index
            )));
        }
        // Initial content is rare but legal; it streams out like a delta.
        let (block, initial) = match start.content_block {
            ContentBlock::Text { text } => {
                let initial = (!text.is_empty()).then(|| Part::text(text.clone()));
                (OpenBlock::Text(text), initial)
            }
            ContentBlock::Thinking { thinking } => {
                let initial = (!thinking.is_empty()).then(|| Part::thought(thinking.clone()));
                (
                    OpenBlock::Thinking {
                        text: thinking,
                        signature: String::new(),
                    },
                    initial,
                )
            }
            ContentBlock::ToolUse { id, name } => (
                OpenBlock::ToolUse {
                    id,
                    name,
                    json: String::new(),
                },
                None,
            ),
            ContentBlock::Other => {
                return Err(ProviderError::protocol(
                    "content_block_start with unsupported block type",
                ))
            }
        };
        self.open = Some((start.index, block));
        match initial {
            Some(part) => Ok(Outcome::Emit(part)),
            None => Ok(Outcome::None),
        }
    }

    fn apply_delta(&mut self, delta: BlockDelta) -> Result<Outcome, ProviderError> {
        let Some((index, block)) = &mut self.open else {
            return Err(ProviderError::protocol(format!(
                "content_block_delta at index {} with no open block",
                delta.index
            )));
        };
        if *index != delta.index {
            return Err(ProviderError::protocol(format!(
                "content_block_delta at index {} while block {} is open",
                delta.index, index
            )));
        }

        match (block, delta.delta) {
            (OpenBlock::Text(buffer), Delta::TextDelta { text }) => {
                buffer.push_str(&text);
                Ok(Outcome::Emit(Part::text(text)))
            }
            (OpenBlock::Thinking { text: buffer, .. }, Delta::ThinkingDelta { thinking }) => {
                buffer.push_str(&thinking);
                Ok(Outcome::Emit(Part::thought(thinking)))
            }
            (OpenBlock::Thinking { signature: buffer, .. }, Delta::SignatureDelta { signature }) => {
                buffer.push_str(&signature);
                Ok(Outcome::None)
            }
            (OpenBlock::ToolUse { json, .. }, Delta::InputJsonDelta { partial_json }) => {
                json.push_str(&partial_json);
                Ok(Outcome::None)
            }
            (_, Delta::SignatureDelta { .. }) => {
                debug!("discarding signature delta outside a thinking block");
                Ok(Outcome::None)
            }
            (_, Delta::Other) => Ok(Outcome::None),
            (block, delta) => Err(ProviderError::protocol(format!(
                "delta {:?} does not match open block {:?}",
                delta, block
            ))),
        }
    }

    fn close_block(&mut self, stop: BlockStop) -> Result<Outcome, ProviderError> {
        let Some((index, block)) = self.open.take() else {
            return Err(ProviderError::protocol(format!(
                "content_block_stop at index {} with no open block",
                stop.index
            )));
        };
        if index != stop.index {
            return Err(ProviderError::protocol(format!(
                "content_block_stop at index {} while block {} is open",
                stop.index, index
            )));
        }

        match block {
            OpenBlock::Text(text) => Ok(Outcome::Close {
                emit: None,
                record: Part::text(text),
            }),
            OpenBlock::Thinking { text, signature } => {
                let record = if signature.is_empty() {
                    Part::thought(text)
                } else {
                    Part::signed_thought(text, signature)
                };
                Ok(Outcome::Close { emit: None, record })
            }
            OpenBlock::ToolUse { id, name, json } => {
                let args = parse_tool_input(&json)?;
                let part = Part::function_call(id, name, args);
                Ok(Outcome::Close {
                    emit: Some(part.clone()),
                    record: part,
                })
            }
        }
    }
}

/// An argument-less call streams an empty buffer, which normalizes to `{}`.
fn parse_tool_input(json: &str) -> Result<Map<String, Value>, ProviderError> {
    if json.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::protocol(format!(
            "tool input decoded to {} instead of an object",
            match other {
                Value::Null => "null",
                Value::Bool(_) => "a boolean",
                Value::Number(_) => "a number",
                Value::String(_) => "a string",
                Value::Array(_) => "an array",
                Value::Object(_) => unreachable!(),
            }
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(kind.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn text_deltas_emit_fragments_and_record_whole() {
        let mut processor = EventProcessor::new();
        processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
            ))
            .unwrap();

        let first = processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ))
            .unwrap();
        match first {
            Outcome::Emit(part) => assert_eq!(part.as_text(), Some("Hi")),
            other => panic!("expected emit, got {other:?}"),
        }

        processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            ))
            .unwrap();

        let close = processor
            .process(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        match close {
            Outcome::Close { emit, record } => {
                assert!(emit.is_none());
                assert_eq!(record.as_text(), Some("Hi there"));
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn initial_block_content_is_emitted() {
        let mut processor = EventProcessor::new();
        let start = processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"text","text":"Hi"}}"#,
            ))
            .unwrap();
        match start {
            Outcome::Emit(part) => assert_eq!(part.as_text(), Some("Hi")),
            other => panic!("expected emit, got {other:?}"),
        }
        processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            ))
            .unwrap();
        let close = processor
            .process(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        match close {
            Outcome::Close { record, .. } => assert_eq!(record.as_text(), Some("Hi there")),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn tool_input_buffers_until_stop() {
        let mut processor = EventProcessor::new();
        processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"tool_use","id":"t1","name":"read_file","input":{}}}"#,
            ))
            .unwrap();

        for fragment in [r#"{"path"#, r#"":"a.rs"}"#] {
            let outcome = processor
                .process(&event(
                    "content_block_delta",
                    &format!(
                        r#"{{"index":0,"delta":{{"type":"input_json_delta","partial_json":{}}}}}"#,
                        serde_json::to_string(fragment).unwrap()
                    ),
                ))
                .unwrap();
            assert!(matches!(outcome, Outcome::None));
        }

        let close = processor
            .process(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        match close {
            Outcome::Close { emit: Some(part), record } => {
                let call = record.as_function_call().unwrap();
                assert_eq!(call.name, "read_file");
                assert_eq!(call.args["path"], "a.rs");
                assert_eq!(part, record);
            }
            other => panic!("expected emitted call, got {other:?}"),
        }
    }

    #[test]
    fn empty_tool_input_normalizes_to_empty_object() {
        let mut processor = EventProcessor::new();
        processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"tool_use","id":"t1","name":"list_files","input":{}}}"#,
            ))
            .unwrap();
        let close = processor
            .process(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        match close {
            Outcome::Close { record, .. } => {
                assert!(record.as_function_call().unwrap().args.is_empty());
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn signature_is_recorded_but_never_emitted() {
        let mut processor = EventProcessor::new();
        processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"thinking","thinking":""}}"#,
            ))
            .unwrap();
        processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"thinking_delta","thinking":"hm"}}"#,
            ))
            .unwrap();
        let outcome = processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"signature_delta","signature":"sig1"}}"#,
            ))
            .unwrap();
        assert!(matches!(outcome, Outcome::None));

        let close = processor
            .process(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        match close {
            Outcome::Close { record, .. } => match record {
                Part::Text {
                    text,
                    thought,
                    thinking_signature,
                } => {
                    assert_eq!(text, "hm");
                    assert!(thought);
                    assert_eq!(thinking_signature.as_deref(), Some("sig1"));
                }
                other => panic!("expected thought, got {other:?}"),
            },
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn delta_index_mismatch_is_a_protocol_error() {
        let mut processor = EventProcessor::new();
        processor
            .process(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
            ))
            .unwrap();
        let err = processor
            .process(&event(
                "content_block_delta",
                r#"{"index":3,"delta":{"type":"text_delta","text":"x"}}"#,
            ))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Protocol(_)));
    }

    #[test]
    fn delta_without_open_block_is_a_protocol_error() {
        let mut processor = EventProcessor::new();
        let err = processor
            .process(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"x"}}"#,
            ))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Protocol(_)));
    }

    #[test]
    fn non_object_tool_input_is_rejected() {
        let err = parse_tool_input("[1,2]").unwrap_err();
        assert!(matches!(err, ProviderError::Protocol(_)));
    }

    #[test]
    fn error_event_fails_the_stream() {
        let mut processor = EventProcessor::new();
        let err = processor
            .process(&event(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"try later"}}"#,
            ))
            .unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }
}
