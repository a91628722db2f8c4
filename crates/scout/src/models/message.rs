use chrono::Utc;

use super::role::Role;
use super::tool::ToolCall;
use crate::errors::AgentResult;

/// An assistant-authored request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: AgentResult<ToolCall>,
}

/// The outcome of one tool invocation, tagged with the originating tool's
/// name so downstream steps can attribute it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub tool_result: AgentResult<Vec<String>>,
}

/// Content passed inside a message, which can be both plain text and tool content
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MessageContent {
    Text(String),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(text.into())
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: AgentResult<ToolCall>) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S: Into<String>, N: Into<String>>(
        id: S,
        name: N,
        tool_result: AgentResult<Vec<String>>,
    ) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            name: name.into(),
            tool_result,
        })
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }
}

/// A message to or from an LLM
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Create a new tool message with the current timestamp
    pub fn tool() -> Self {
        Message::new(Role::Tool)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool request to the message
    pub fn with_tool_request<S: Into<String>>(
        self,
        id: S,
        tool_call: AgentResult<ToolCall>,
    ) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response<S: Into<String>, N: Into<String>>(
        self,
        id: S,
        name: N,
        result: AgentResult<Vec<String>>,
    ) -> Self {
        self.with_content(MessageContent::tool_response(id, name, result))
    }

    /// All tool requests carried by this message
    pub fn tool_requests(&self) -> Vec<&ToolRequest> {
        self.content
            .iter()
            .filter_map(|content| content.as_tool_request())
            .collect()
    }

    /// Whether this message carries any pending tool requests
    pub fn has_tool_requests(&self) -> bool {
        self.content
            .iter()
            .any(|content| content.as_tool_request().is_some())
    }

    /// Concatenate all text content in the message
    pub fn as_concat_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| content.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
