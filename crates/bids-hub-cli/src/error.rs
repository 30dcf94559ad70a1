//! Error types for the CLI
//!
//! Each variant carries a message a user can act on.

use bids_hub_core::{PipelineError, TransportError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Neither a file nor a built-in schema name
    #[error("Schema not found: '{0}'. Run 'bids-hub list' for built-in schemas or pass a path to a TOML file.")]
    SchemaNotFound(String),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Registry error: {0}. Check HF_ENDPOINT and HF_TOKEN.")]
    Transport(#[from] TransportError),

    /// At least one validation check failed
    #[error("{failed} of {total} validation checks failed")]
    ValidationFailed { failed: usize, total: usize },

    /// The session ended in PUBLISH_FAILED; staging is intact
    #[error("Publishing failed: {reason}. Staging kept at {session}; run 'bids-hub resume {session}' to continue.")]
    PublishFailed { session: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn publish_failed(session: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            session: session.into(),
            reason: reason.into(),
        }
    }
}
