//! Crate-level error taxonomy
//!
//! Each component defines the errors it can surface; this module aggregates
//! them into a single type for callers that cross component boundaries
//! (the coordinator, the CLI). Errors here are reserved for failures that
//! must abort the calling operation — rejections, skips, and absorbed
//! malformed-input cases are represented as in-band status fields instead,
//! never as `Err`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),

    #[error("intent pipeline error: {0}")]
    Intents(#[from] crate::intents::IntentError),

    #[error("manifest error: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),

    #[error("escalation error: {0}")]
    Escalation(#[from] crate::escalation::EscalationError),

    #[error("verification error: {0}")]
    Verification(#[from] crate::verification::VerificationError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
