//! Incremental parser for `text/event-stream` bodies.
//!
//! Network reads arrive in arbitrary chunks, so the parser keeps an internal
//! buffer and only yields events once a full blank-line-terminated frame has
//! accumulated. Lines that do not fit the field grammar are skipped rather
//! than failing the stream; providers occasionally emit keepalive noise.

use tracing::debug;

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any frame line carried one.
    pub event: Option<String>,
    /// All `data:` lines of the frame joined with newlines.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        SseParser::default()
    }

    /// Feeds a chunk of the response body and returns every event completed
    /// by it. Partial frames stay buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        // Normalize CRLF so the frame delimiter is always "\n\n".
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let frame = self.buffer[..boundary].to_string();
            self.buffer.drain(..boundary + 2);
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(':') {
            // Comment line, commonly used as a keepalive.
            continue;
        }
        let Some((field, rest)) = line.split_once(':') else {
            debug!(line, "skipping malformed event-stream line");
            continue;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            // id and retry are irrelevant to the adapters.
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: message_start\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: content_block").is_empty());
        assert!(parser.feed(b"_delta\ndata: {\"x\"").is_empty());
        let events = parser.feed(b":2}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(events[0].data, "{\"x\":2}");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comments_and_malformed_lines_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\ngarbage line\ndata: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn crlf_delimiters_are_normalized() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: done\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("done"));
        assert_eq!(events[0].data, "[DONE]");
    }

    #[test]
    fn comment_only_frame_yields_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": ping\n\n").is_empty());
    }

    #[test]
    fn value_without_leading_space() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data:tight\n\n");
        assert_eq!(events[0].data, "tight");
    }
}
