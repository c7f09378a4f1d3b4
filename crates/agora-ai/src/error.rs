use std::time::Duration;

use thiserror::Error;

/// Errors produced by configuration loading, routing and providers.
#[derive(Error, Debug)]
pub enum AiError {
    /// No usable descriptor for `purpose`, or the descriptor names a
    /// provider missing from `ai_providers`.
    #[error("{}Provider not configured for purpose: {purpose}", provider_prefix(.provider))]
    NotConfigured {
        purpose: String,
        provider: Option<String>,
    },

    /// The routing file is structurally invalid (missing required keys).
    #[error("Invalid AI configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The provider rejected the call because of a rate or token limit.
    #[error("[{provider}] quota exceeded: {message}")]
    Quota {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network failure or timeout talking to the provider.
    #[error("[{provider}] connection error: {message}")]
    Connection { provider: String, message: String },

    /// The provider answered with an error status or an unusable body.
    #[error("[{provider}] bad response: {message}")]
    Response { provider: String, message: String },
}

fn provider_prefix(provider: &Option<String>) -> String {
    match provider {
        Some(name) => format!("[{name}] "),
        None => String::new(),
    }
}

impl AiError {
    pub fn not_configured(purpose: impl Into<String>, provider: Option<&str>) -> Self {
        Self::NotConfigured {
            purpose: purpose.into(),
            provider: provider.map(str::to_string),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AiError>;
