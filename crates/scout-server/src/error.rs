use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings path to the environment variable that provides it.
pub fn to_env_var(field: &str) -> String {
    format!("SCOUT_{}", field.replace('.', "__").to_uppercase())
}
