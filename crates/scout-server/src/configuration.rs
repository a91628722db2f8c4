use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use scout::providers::configs::OpenAiProviderConfig;
use scout::retriever::KnowledgeBaseConfig;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: OpenAiProviderConfig,
    pub knowledge_base: KnowledgeBaseConfig,
}

impl Settings {
    /// Load settings from `SCOUT_`-prefixed environment variables, e.g.
    /// `SCOUT_PROVIDER__API_KEY` or `SCOUT_KNOWLEDGE_BASE__ID`.
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("SCOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Surface missing settings as the environment variable the operator
        // has to set, rather than a serde field path
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&qualify_field(field)),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Restore the section prefix serde strips from nested missing-field errors.
///
/// Only fields without a default can go missing, and their bare names are
/// unambiguous: `api_key` belongs to the provider section, and `host`/`id`
/// to the knowledge-base section (the provider host has a default).
fn qualify_field(field: &str) -> String {
    match field {
        "api_key" => "provider.api_key".to_string(),
        "host" | "id" => format!("knowledge_base.{}", field),
        other => other.to_string(),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}
