use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ModelParameters, Provider, TextStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{messages_to_spec, response_to_message, tools_to_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: ModelParameters,
    ) -> Value {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
            "temperature": params.temperature,
        });

        if !tools.is_empty() {
            payload
                .as_object_mut()
                .unwrap()
                .insert("tools".to_string(), json!(tools_to_spec(tools)));
        }
        if let Some(top_p) = params.top_p {
            payload
                .as_object_mut()
                .unwrap()
                .insert("top_p".to_string(), json!(top_p));
        }

        payload
    }

    async fn post(&self, payload: Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => Err(anyhow!("Request failed: {}", status)),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: ModelParameters,
    ) -> Result<(Message, Usage)> {
        let payload = self.build_payload(system, messages, tools, params);
        let response: Value = self.post(payload).await?.json().await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("Model API error: {}", error));
        }

        let message = response_to_message(response.clone())?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        params: ModelParameters,
    ) -> Result<TextStream> {
        let mut payload = self.build_payload(system, messages, &[], params);
        payload
            .as_object_mut()
            .unwrap()
            .insert("stream".to_string(), json!(true));

        let response = self.post(payload).await?;
        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::try_stream! {
            let mut buffer = String::new();
            'receive: while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // server-sent events arrive as "data: <json>" lines
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let data = match line.strip_prefix("data:") {
                        Some(data) => data.trim(),
                        None => continue,
                    };
                    if data == "[DONE]" {
                        break 'receive;
                    }

                    let value: Value = serde_json::from_str(data)?;
                    if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                        if !delta.is_empty() {
                            yield delta.to_string();
                        }
                    }
                }
            }
        }))
    }
}
