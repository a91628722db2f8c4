use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while routing a model-requested tool call.
///
/// The workflow dispatches exactly one tool, so the taxonomy is small: the
/// model asked for a tool we never bound, or the call arguments do not fit
/// the tool's schema. Service-level failures (model or knowledge base) travel
/// as `anyhow` errors at the call seams instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let error = AgentError::ToolNotFound("file_system".to_string());
        assert_eq!(error.to_string(), "Tool not found: file_system");

        let error = AgentError::InvalidParameters("query must be a string".to_string());
        assert_eq!(error.to_string(), "Invalid parameters: query must be a string");
    }
}
