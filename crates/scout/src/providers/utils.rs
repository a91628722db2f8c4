use anyhow::Result;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{Tool, ToolCall};

/// Convert internal Message format to the chat-completions message specification
pub fn messages_to_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.is_empty() {
                        converted["content"] = json!(text);
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let tool_calls = converted
                            .as_object_mut()
                            .unwrap()
                            .entry("tool_calls")
                            .or_insert(json!([]));

                        tool_calls.as_array_mut().unwrap().push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": tool_call.name,
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        output.push(json!({
                            "role": "tool",
                            "content": contents.join("\n"),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model
                        // can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to the chat-completions tool specification
pub fn tools_to_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Convert a chat-completions response body to internal Message format
pub fn response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|c| c.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            message = match serde_json::from_str::<Value>(arguments) {
                Ok(params) => {
                    message.with_tool_request(id, Ok(ToolCall::new(function_name, params)))
                }
                Err(e) => message.with_tool_request(
                    id,
                    Err(AgentError::InvalidParameters(format!(
                        "Could not interpret tool call arguments for {}: {}",
                        function_name, e
                    ))),
                ),
            };
        }
    }

    Ok(message)
}
