//! Error taxonomy for the crate.
//!
//! The split matters operationally: a [`ToolError`] is usually reported back
//! to the model as a failed function response so the conversation can
//! continue, while a [`ProviderError`] or [`TurnError`] ends the turn.

use thiserror::Error;

/// Failure while talking to a model backend.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The stream violated the backend's own protocol, for example a delta
    /// for a block that was never started.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to persist history: {0}")]
    Storage(String),
}

impl ProviderError {
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        ProviderError::Protocol(message.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            message: message.into(),
        }
    }
}

/// Failure while resolving or executing a tool call.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("no tool named {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed. The message goes back to the model.
    #[error("{0}")]
    Failed(String),

    /// The user refused to let the tool run.
    #[error("declined: {0}")]
    Declined(String),

    #[error("tool timed out after {0} seconds")]
    Timeout(u64),
}

impl ToolError {
    /// Fatal errors abort the turn; the rest are reported to the model as
    /// an error response so it can adjust. An unknown name or undecodable
    /// arguments means the exchange itself is broken, not just the tool.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToolError::NotFound(_) | ToolError::InvalidArguments(_)
        )
    }
}

/// Failure of a whole request/dispatch cycle.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Stream(#[from] ProviderError),

    #[error("tool dispatch failed: {0}")]
    Dispatch(#[from] ToolError),

    #[error("model requested tools for {0} consecutive rounds; giving up")]
    RoundLimit(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no backend named {0} in config")]
    UnknownBackend(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("backend {0} has neither api_key nor api_key_env")]
    MissingKey(String),
}
