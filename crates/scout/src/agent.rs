use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::errors::AgentError;
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;
use crate::prompt::{generate_answer_system_message, generate_query_system_message};
use crate::providers::base::{ModelParameters, Provider};
use crate::retriever::{knowledge_base_tool, KnowledgeBase, KNOWLEDGE_BASE_TOOL};

/// Sampling temperature for the query-decision step; high to encourage
/// decisive query phrasing.
const QUERY_TEMPERATURE: f32 = 1.0;

/// Sampling temperature for the answer step; low for deterministic,
/// grounded phrasing.
const ANSWER_TEMPERATURE: f32 = 0.1;

/// The workflow node that produced a streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentNode {
    GenerateQuery,
    Retrieve,
    GenerateAnswer,
}

/// One increment of a workflow execution, tagged with its producing node so
/// callers can filter on attribution.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A complete message appended to the conversation state
    Message { node: AgentNode, message: Message },
    /// An incremental text fragment of the final answer
    TextDelta { node: AgentNode, delta: String },
}

/// Derive the retrieval context for the current turn by scanning the
/// conversation log from most recent backward, collecting every non-empty
/// result attributed to the knowledge retrieval tool. Encounter order is
/// kept as scanned, so the merged blob reads recency-first.
fn merged_context(messages: &[Message]) -> String {
    let mut contexts: Vec<&str> = Vec::new();
    for message in messages.iter().rev() {
        for content in &message.content {
            if let Some(response) = content.as_tool_response() {
                if response.name != KNOWLEDGE_BASE_TOOL {
                    continue;
                }
                if let Ok(results) = &response.tool_result {
                    contexts.extend(
                        results
                            .iter()
                            .map(String::as_str)
                            .filter(|text| !text.is_empty()),
                    );
                }
            }
        }
    }
    contexts.join("\n\n")
}

/// The model input for the answer step: user turns plus answer-bearing
/// assistant turns, in conversation order. Assistant turns that merely
/// requested tools, and the tool results themselves, are excluded.
fn answer_conversation(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|message| match message.role {
            Role::User => true,
            Role::Assistant => !message.has_tool_requests(),
            Role::Tool => false,
        })
        .cloned()
        .collect()
}

/// The retrieval workflow graph: decide whether to query the knowledge base,
/// execute any requested retrievals, then stream a grounded answer.
///
/// One call to [`RetrieverAgent::reply`] is one pass through
/// `generate_query` -> (`retrieve`)? -> `generate_answer`; there are no
/// cycles, and follow-up turns arrive as new calls with accumulated history.
pub struct RetrieverAgent {
    provider: Box<dyn Provider>,
    knowledge_base: Box<dyn KnowledgeBase>,
}

impl RetrieverAgent {
    pub fn new(provider: Box<dyn Provider>, knowledge_base: Box<dyn KnowledgeBase>) -> Self {
        Self {
            provider,
            knowledge_base,
        }
    }

    /// Execute a single requested tool call, returning one extracted text
    /// per retrieved document. Retrieval-service errors are not caught here;
    /// they surface on the reply stream.
    async fn dispatch_tool_call(&self, request: &ToolRequest) -> Result<Vec<String>> {
        let call = request.tool_call.clone()?;
        if call.name != KNOWLEDGE_BASE_TOOL {
            return Err(AgentError::ToolNotFound(call.name).into());
        }
        let query = call
            .arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidParameters("query must be a string".to_string()))?;

        let documents = self.knowledge_base.retrieve(query).await?;
        Ok(documents
            .into_iter()
            .map(|document| document.content)
            .collect())
    }

    /// Create a stream that yields each event as the workflow produces it:
    /// the query-decision message (when it requests tools), one message per
    /// tool result, then the answer as text deltas followed by the
    /// consolidated assistant message.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<AgentEvent>>> {
        let mut messages = messages.to_vec();

        Ok(Box::pin(async_stream::try_stream! {
            // generate_query: decide whether retrieval is needed
            let (response, usage) = self
                .provider
                .complete(
                    &generate_query_system_message(),
                    &messages,
                    &[knowledge_base_tool()],
                    ModelParameters::new(QUERY_TEMPERATURE),
                )
                .await?;
            tracing::debug!(?usage, "query decision complete");

            let tool_requests: Vec<ToolRequest> =
                response.tool_requests().into_iter().cloned().collect();

            // No tool requests means no state update: route straight to the
            // answer step with the conversation unchanged.
            if !tool_requests.is_empty() {
                messages.push(response.clone());
                yield AgentEvent::Message {
                    node: AgentNode::GenerateQuery,
                    message: response,
                };

                // Ensure the message above is delivered before the
                // potentially long-running retrievals start
                tokio::task::yield_now().await;

                // retrieve: execute every requested call, results keyed by
                // call identity
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| self.dispatch_tool_call(request))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                for (request, output) in tool_requests.iter().zip(outputs) {
                    let results = output?;
                    let message = Message::tool().with_tool_response(
                        request.id.clone(),
                        KNOWLEDGE_BASE_TOOL,
                        Ok(results),
                    );
                    messages.push(message.clone());
                    yield AgentEvent::Message {
                        node: AgentNode::Retrieve,
                        message,
                    };
                }
            }

            // generate_answer: stream the grounded reply
            let system = generate_answer_system_message(&merged_context(&messages));
            let conversation = answer_conversation(&messages);
            let mut deltas = self
                .provider
                .stream(&system, &conversation, ModelParameters::new(ANSWER_TEMPERATURE))
                .await?;

            let mut reply = String::new();
            while let Some(delta) = deltas.next().await {
                let delta = delta?;
                reply.push_str(&delta);
                yield AgentEvent::TextDelta {
                    node: AgentNode::GenerateAnswer,
                    delta,
                };
            }

            yield AgentEvent::Message {
                node: AgentNode::GenerateAnswer,
                message: Message::assistant().with_text(reply),
            };
        }))
    }
}
