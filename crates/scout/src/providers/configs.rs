use serde::Deserialize;

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}
