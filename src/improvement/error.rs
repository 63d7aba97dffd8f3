//! Error taxonomy for the improvement pipeline

use super::record::Status;

/// Errors surfaced by pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum ImprovementError {
    #[error("unknown improvement category: {0}")]
    UnknownCategory(String),

    #[error("improvement not found: {0}")]
    NotFound(String),

    #[error("cannot {action} improvement {id}: current status is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: Status,
    },

    #[error("improvement {id} is not approved (status: {status})")]
    NotApproved { id: String, status: Status },

    #[error("improvement {id} is not applied (status: {status})")]
    NotApplied { id: String, status: Status },

    #[error("failed to apply improvement {id}: {reason}")]
    ApplyFailed { id: String, reason: String },

    #[error("failed to restore backup for improvement {id}: {reason}")]
    RestoreFailed { id: String, reason: String },

    #[error(transparent)]
    DetectorFailed(#[from] DetectorError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single detector's failure. Collected by the scanner, never fatal to a scan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("detector '{detector}' failed: {message}")]
pub struct DetectorError {
    pub detector: String,
    pub message: String,
}

impl DetectorError {
    pub fn new(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            detector: detector.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = ImprovementError> = std::result::Result<T, E>;
