//! Adapter for the Anthropic messages API.

pub mod event;
pub mod wire;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;

use self::event::{EventProcessor, Outcome};
use crate::errors::ProviderError;
use crate::models::history::{self, HistoryEntry};
use crate::models::part::Part;
use crate::providers::base::{Agent, AgentOptions, ToolSpec};
use crate::providers::configs::AnthropicConfig;
use crate::providers::sse::SseParser;
use crate::providers::util;

pub struct AnthropicAgent {
    client: Client,
    host: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    thinking_budget: Option<u32>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    history: Vec<HistoryEntry>,
    history_path: Option<PathBuf>,
}

impl AnthropicAgent {
    pub fn new(config: AnthropicConfig, options: AgentOptions) -> Result<Self> {
        let api_key = config.api_key.resolve("anthropic")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        let history = match &options.history_path {
            Some(path) => history::load_history(path)?,
            None => Vec::new(),
        };
        Ok(AnthropicAgent {
            client,
            host: config.host,
            api_key,
            model: config.model,
            max_tokens: config.max_tokens.unwrap_or(wire::DEFAULT_MAX_TOKENS),
            thinking_budget: config.thinking_budget,
            system_prompt: options.system_prompt,
            tools: options.tools,
            history,
            history_path: options.history_path,
        })
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

impl Agent for AnthropicAgent {
    fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
    ) -> BoxStream<'_, Result<Part, ProviderError>> {
        Box::pin(try_stream! {
            let sent: Vec<HistoryEntry> = parts.into_iter().map(HistoryEntry::user).collect();
            self.history.extend(sent.iter().cloned());

            let body = wire::build_request(
                &self.model,
                self.max_tokens,
                self.thinking_budget,
                &self.system_prompt,
                &self.tools,
                &self.history,
            );
            let response = self
                .client
                .post(format!("{}/v1/messages", self.host))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", wire::ANTHROPIC_API_VERSION)
                .json(&body)
                .send()
                .await?;
            let response = util::check_status(response).await?;

            let mut parser = SseParser::new();
            let mut processor = EventProcessor::new();
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
                        Outcome::None => {}
                        Outcome::Emit(part) => yield part,
                        Outcome::Close { emit, record } => {
                            // Into history as each block closes, so a stream
                            // that dies later keeps what already finished.
                            let entry = HistoryEntry::assistant(record);
                            self.history.push(entry.clone());
                            recorded.push(entry);
                            if let Some(part) = emit {
                                yield part;
                            }
                        }
                        Outcome::Done => {
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
