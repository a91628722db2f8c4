use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use std::sync::Arc;
use std::sync::Mutex;

use super::base::{ModelParameters, Provider, TextStream, Usage};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One recorded model invocation, kept so tests can assert on the exact
/// input that reached the provider.
#[derive(Debug, Clone)]
pub struct CapturedCompletion {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub params: ModelParameters,
}

/// A mock provider that returns pre-configured responses for testing.
/// Clones share the response queue and the capture log.
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    captured: Arc<Mutex<Vec<CapturedCompletion>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All invocations seen so far, in order
    pub fn captured(&self) -> Vec<CapturedCompletion> {
        self.captured.lock().unwrap().clone()
    }

    fn record(&self, system: &str, messages: &[Message], tools: &[Tool], params: ModelParameters) {
        self.captured.lock().unwrap().push(CapturedCompletion {
            system: system.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            params,
        });
    }

    fn next_response(&self) -> Message {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Message::assistant().with_text("")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: ModelParameters,
    ) -> Result<(Message, Usage)> {
        self.record(system, messages, tools, params);
        Ok((self.next_response(), Usage::default()))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        params: ModelParameters,
    ) -> Result<TextStream> {
        self.record(system, messages, &[], params);
        // Each text content of the canned response becomes one delta
        let deltas: Vec<Result<String>> = self
            .next_response()
            .content
            .iter()
            .filter_map(|content| content.as_text().map(|text| Ok(text.to_string())))
            .collect();
        Ok(Box::pin(stream::iter(deltas)))
    }
}
