use crate::state::AppState;
use axum::{
    extract::State,
    http,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use scout::{
    agent::{AgentEvent, AgentNode, RetrieverAgent},
    models::message::Message,
    providers::openai::OpenAiProvider,
    retriever::HttpKnowledgeBase,
};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The inbound invocation payload
#[derive(Debug, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    role: String,
    #[serde(default)]
    content: String,
}

/// One outbound streamed event
#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ResponseEvent {
    Text { text: String },
    Error { text: String, error_details: String },
}

impl ResponseEvent {
    fn error<S: Into<String>>(text: S, error_details: S) -> Self {
        ResponseEvent::Error {
            text: text.into(),
            error_details: error_details.into(),
        }
    }
}

// Server-sent-events response carrying the serialized event stream
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap()
    }
}

fn format_event(event: &ResponseEvent) -> String {
    let encoded = serde_json::to_string(event).unwrap_or_default();
    format!("data: {}\n\n", encoded)
}

/// Convert the payload's conversation history into the workflow's initial
/// state: user/assistant entries map in order, other roles are dropped, and
/// the new prompt lands last.
fn build_messages(history: &[HistoryEntry], prompt: &str) -> Vec<Message> {
    let mut messages = Vec::new();

    for entry in history {
        match entry.role.as_str() {
            "user" => messages.push(Message::user().with_text(entry.content.clone())),
            "assistant" => messages.push(Message::assistant().with_text(entry.content.clone())),
            other => {
                tracing::warn!("ignoring conversation history entry with role: {}", other);
            }
        }
    }

    messages.push(Message::user().with_text(prompt));
    messages
}

fn build_agent(state: &AppState) -> anyhow::Result<RetrieverAgent> {
    let provider = OpenAiProvider::new(state.provider_config.clone())?;
    let knowledge_base = HttpKnowledgeBase::new(state.knowledge_base_config.clone())?;
    Ok(RetrieverAgent::new(
        Box::new(provider),
        Box::new(knowledge_base),
    ))
}

async fn handler(State(state): State<AppState>, Json(request): Json<InvokeRequest>) -> SseResponse {
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    // Validation failure: one error event, and nothing else runs
    if request.prompt.is_empty() {
        let _ = tx
            .send(format_event(&ResponseEvent::error(
                "No user input provided",
                "No user input provided",
            )))
            .await;
        return SseResponse::new(stream);
    }

    let messages = build_messages(&request.conversation_history, &request.prompt);

    tokio::spawn(async move {
        // Failure zone 1: request setup
        let agent = match build_agent(&state) {
            Ok(agent) => agent,
            Err(e) => {
                tracing::error!("Error setting up agent for request: {}", e);
                let _ = tx
                    .send(format_event(&ResponseEvent::error(
                        "Something went wrong while setting up the request.".to_string(),
                        e.to_string(),
                    )))
                    .await;
                return;
            }
        };

        let mut stream = match agent.reply(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Error starting agent reply stream: {}", e);
                let _ = tx
                    .send(format_event(&ResponseEvent::error(
                        "Something went wrong while setting up the request.".to_string(),
                        e.to_string(),
                    )))
                    .await;
                return;
            }
        };

        // Failure zone 2: stream consumption. Only answer increments are
        // re-emitted; everything else on the agent stream is internal.
        while let Some(event) = stream.next().await {
            match event {
                Ok(AgentEvent::TextDelta {
                    node: AgentNode::GenerateAnswer,
                    delta,
                }) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if tx
                        .send(format_event(&ResponseEvent::Text { text: delta }))
                        .await
                        .is_err()
                    {
                        // Client disconnected
                        break;
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("Streaming agent response failed: {}", e);
                    let _ = tx
                        .send(format_event(&ResponseEvent::error(
                            "Something went wrong while streaming the response.".to_string(),
                            e.to_string(),
                        )))
                        .await;
                    return;
                }
            }
        }
    });

    SseResponse::new(stream)
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/invocations", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use scout::providers::configs::OpenAiProviderConfig;
    use scout::retriever::KnowledgeBaseConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_state(provider_host: &str, knowledge_base_host: &str) -> AppState {
        AppState {
            provider_config: OpenAiProviderConfig {
                host: provider_host.to_string(),
                api_key: "test-key".to_string(),
                model: "gpt-4o".to_string(),
            },
            knowledge_base_config: KnowledgeBaseConfig {
                host: knowledge_base_host.to_string(),
                id: "kb-test".to_string(),
            },
        }
    }

    async fn post_invocation(state: AppState, payload: Value) -> Vec<Value> {
        let app = routes(state);
        let response = app
            .oneshot(
                axum::http::Request::post("/invocations")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        body.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[test]
    fn test_build_messages_maps_known_roles_in_order() {
        let history = vec![
            HistoryEntry {
                role: "user".to_string(),
                content: "What is the refund policy?".to_string(),
            },
            HistoryEntry {
                role: "assistant".to_string(),
                content: "Refunds take five days.".to_string(),
            },
            HistoryEntry {
                role: "system".to_string(),
                content: "ignore me".to_string(),
            },
        ];

        let messages = build_messages(&history, "thanks, and store credit?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].as_concat_text(), "What is the refund policy?");
        assert_eq!(messages[1].as_concat_text(), "Refunds take five days.");
        assert_eq!(messages[2].as_concat_text(), "thanks, and store credit?");
    }

    #[test]
    fn test_event_wire_shapes() {
        let text = serde_json::to_value(ResponseEvent::Text {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(text, json!({"type": "text", "text": "hi"}));

        let error = serde_json::to_value(ResponseEvent::error("boom", "details")).unwrap();
        assert_eq!(
            error,
            json!({"type": "error", "text": "boom", "error_details": "details"})
        );
    }

    #[test]
    fn test_format_event_frames_as_sse_data() {
        let frame = format_event(&ResponseEvent::Text {
            text: "hi".to_string(),
        });
        assert_eq!(frame, "data: {\"type\":\"text\",\"text\":\"hi\"}\n\n");
    }

    #[tokio::test]
    async fn test_empty_prompt_yields_a_single_error_event() {
        // Unroutable hosts: validation must fail before any network call
        let state = test_state("http://127.0.0.1:1", "http://127.0.0.1:1");
        let events = post_invocation(state, json!({"prompt": ""})).await;

        assert_eq!(
            events,
            vec![json!({
                "type": "error",
                "text": "No user input provided",
                "error_details": "No user input provided"
            })]
        );
    }

    #[tokio::test]
    async fn test_missing_prompt_is_treated_as_empty() {
        let state = test_state("http://127.0.0.1:1", "http://127.0.0.1:1");
        let events = post_invocation(state, json!({})).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], json!("error"));
    }

    #[tokio::test]
    async fn test_full_retrieval_round_trip_streams_text_events() {
        let model_server = MockServer::start().await;
        let kb_server = MockServer::start().await;

        // Query-decision call (temperature 1.0, no stream flag)
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"temperature": 1.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "knowledge_base_retriever",
                                "arguments": "{\"query\":\"refund policy\"}"
                            }
                        }]
                    }
                }]
            })))
            .mount(&model_server)
            .await;

        // Answer call (streamed)
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Refunds \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"take 5 days.\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
            )
            .mount(&model_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/knowledgebases/kb-test/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "content": "Refunds are processed within 5 business days.",
                    "metadata": {"type": "text"}
                }
            ])))
            .mount(&kb_server)
            .await;

        let state = test_state(&model_server.uri(), &kb_server.uri());
        let events =
            post_invocation(state, json!({"prompt": "What is the refund policy?"})).await;

        assert_eq!(
            events,
            vec![
                json!({"type": "text", "text": "Refunds "}),
                json!({"type": "text", "text": "take 5 days."}),
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieval_failure_surfaces_as_one_error_event() {
        let model_server = MockServer::start().await;
        let kb_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "knowledge_base_retriever",
                                "arguments": "{\"query\":\"refund policy\"}"
                            }
                        }]
                    }
                }]
            })))
            .mount(&model_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/knowledgebases/kb-test/retrieve"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&kb_server)
            .await;

        let state = test_state(&model_server.uri(), &kb_server.uri());
        let events =
            post_invocation(state, json!({"prompt": "What is the refund policy?"})).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], json!("error"));
        assert_eq!(
            events[0]["text"],
            json!("Something went wrong while streaming the response.")
        );
        assert!(events[0]["error_details"]
            .as_str()
            .unwrap()
            .contains("Knowledge base request failed"));
    }
}
