//! Error types for parlor-agent

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::StoreError;

/// Result type alias using parlor-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can fail a turn or an administrative operation
#[derive(Error, Debug)]
pub enum Error {
    /// The language model call failed or its stream broke off
    #[error("Response generation failed: {0}")]
    UpstreamGeneration(String),

    /// The context retriever failed
    #[error("Context retrieval failed: {0}")]
    Retrieval(String),

    /// Conversation summarization or context compression failed
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// The checkpoint store failed or rejected a write
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The caller asked for a persona the registry does not know
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// The turn request itself was malformed
    #[error("Invalid turn input: {0}")]
    InvalidTurnInput(String),

    /// The graph did not reach Done within the configured number of steps
    #[error("Turn exceeded {max_steps} generation steps")]
    StepLimitExceeded { max_steps: usize },

    /// The turn was cancelled before its first external call
    #[error("Turn cancelled")]
    Cancelled,

    /// Orchestrator configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Whether a failed request may be resubmitted unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Transient failure; nothing was persisted, so the same turn can be retried
    RetrySafe,
    /// The request itself is wrong and will fail again
    InvalidRequest,
}

/// Serializable error summary handed to transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub retry_safe: bool,
}

impl Error {
    /// Classify the error for callers deciding whether to resubmit
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::UpstreamGeneration(_)
            | Error::Retrieval(_)
            | Error::Summarization(_)
            | Error::Persistence(_)
            | Error::StepLimitExceeded { .. }
            | Error::Cancelled => Disposition::RetrySafe,
            Error::UnknownPersona(_) | Error::InvalidTurnInput(_) | Error::Config(_) => {
                Disposition::InvalidRequest
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::UpstreamGeneration(_) => "upstream_generation",
            Error::Retrieval(_) => "retrieval",
            Error::Summarization(_) => "summarization",
            Error::Persistence(_) => "persistence",
            Error::UnknownPersona(_) => "unknown_persona",
            Error::InvalidTurnInput(_) => "invalid_turn_input",
            Error::StepLimitExceeded { .. } => "step_limit_exceeded",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "invalid_config",
        }
    }

    /// Build the caller-facing report
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.to_string(),
            retry_safe: self.disposition() == Disposition::RetrySafe,
        }
    }
}
