//! Error types for the pipeline
//!
//! Discovery and assembly fail fast on lossy or ambiguous trees; validation
//! and publishing accumulate and report instead, so only their fatal paths
//! surface here.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source tree violates a layout assumption
    #[error("Structural error: {0}")]
    Structural(String),

    /// A required paired file is absent
    #[error("Missing companion for {record} column '{field}': {path}")]
    CompanionMissing {
        record: String,
        field: String,
        path: String,
    },

    /// A value fell outside a closed set, or a singleton matched several files
    #[error("Classification error for {record} column '{field}': {message}")]
    Classification {
        record: String,
        field: String,
        message: String,
    },

    /// The injected dataset schema is inconsistent
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid session transition, held lease, or refused teardown
    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Common(#[from] bids_hub_common::CommonError),
}

impl PipelineError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn classification(
        record: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Classification {
            record: record.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures talking to a remote registry. Retried by the publisher with a
/// shrinking batch; fatal only once the retry budget is spent.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry refused the request outright (bad payload, auth)
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// A metadata cell that could not be coerced. Never propagated: logged and
/// replaced by null.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce '{raw}' in column '{column}' to {dtype}")]
pub struct ParseError {
    pub column: String,
    pub raw: String,
    pub dtype: &'static str,
}
