//! Scripted backend for exercising the turn loop without a network.

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::errors::ProviderError;
use crate::models::part::Part;
use crate::providers::base::Agent;

/// Replays canned replies in order, one script per call, and records what
/// it was sent so tests can assert on dispatch behavior.
#[derive(Debug, Default)]
pub struct MockAgent {
    scripts: VecDeque<Vec<Result<Part, String>>>,
    pub received: Vec<Vec<Part>>,
}

impl MockAgent {
    pub fn new() -> Self {
        MockAgent::default()
    }

    /// Queues a reply whose parts are yielded on the next call.
    pub fn reply_with(mut self, parts: Vec<Part>) -> Self {
        self.scripts
            .push_back(parts.into_iter().map(Ok).collect());
        self
    }

    /// Queues a reply that fails mid-stream after yielding `parts`.
    pub fn fail_after(mut self, parts: Vec<Part>, message: &str) -> Self {
        let mut script: Vec<Result<Part, String>> = parts.into_iter().map(Ok).collect();
        script.push(Err(message.to_string()));
        self.scripts.push_back(script);
        self
    }
}

impl Agent for MockAgent {
    fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
    ) -> BoxStream<'_, Result<Part, ProviderError>> {
        self.received.push(parts);
        let script = self.scripts.pop_front().unwrap_or_default();
        futures::stream::iter(
            script
                .into_iter()
                .map(|step| step.map_err(ProviderError::protocol)),
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn scripts_play_back_in_order() {
        let mut agent = MockAgent::new()
            .reply_with(vec![Part::text("first")])
            .reply_with(vec![Part::text("second")]);

        let parts: Vec<Part> = agent
            .send_message_stream(vec![Part::text("hi")])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(parts[0].as_text(), Some("first"));

        let parts: Vec<Part> = agent
            .send_message_stream(vec![Part::text("again")])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(parts[0].as_text(), Some("second"));
        assert_eq!(agent.received.len(), 2);
    }

    #[tokio::test]
    async fn failure_surfaces_after_scripted_parts() {
        let mut agent = MockAgent::new().fail_after(vec![Part::text("partial")], "boom");
        let mut stream = agent.send_message_stream(vec![]);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }
}
