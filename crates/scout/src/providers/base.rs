use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

/// Sampling controls forwarded to the hosted model on each invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub temperature: f32,
    pub top_p: Option<f32>,
}

impl ModelParameters {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            top_p: None,
        }
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Incremental text fragments of a reply, in delivery order.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Base trait for hosted model services
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the conversation, optionally binding a
    /// set of invocable tools the model may request.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: ModelParameters,
    ) -> Result<(Message, Usage)>;

    /// Generate a reply as a stream of text increments.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        params: ModelParameters,
    ) -> Result<TextStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));
    }

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let serialized = serde_json::to_string(&usage)?;
        let json_value: serde_json::Value = serde_json::from_str(&serialized)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        assert_eq!(json_value["total_tokens"], json!(30));
        Ok(())
    }

    #[test]
    fn test_model_parameters_builder() {
        let params = ModelParameters::new(1.0);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.top_p, None);

        let params = ModelParameters::new(0.1).with_top_p(0.9);
        assert_eq!(params.top_p, Some(0.9));
    }
}
