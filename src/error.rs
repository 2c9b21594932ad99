//! Error types for the plan / execute / commit workflow

use crate::gateway::{GatewayError, GatewayErrorKind};
use crate::plan::StepStatus;

/// Errors surfaced by the [`Coordinator`](crate::coordinator::Coordinator)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForgeError {
    #[error("describe the change you want before creating a plan")]
    EmptyPrompt,

    #[error("no plan has been created yet")]
    NoPlan,

    #[error("plan has no step with id {0}")]
    UnknownStep(String),

    /// Model output for plan generation was not a usable plan
    #[error("could not parse plan: {0}")]
    PlanParse(String),

    /// Re-entrant execution of a step that is still running
    #[error("step {0} is already running")]
    StepBusy(String),

    #[error("step {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// A new plan was created while the step was running
    #[error("plan was replaced while step {0} was running")]
    PlanReplaced(String),

    #[error("no proposed edit for {0}")]
    NoProposedEdit(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Unknown model identifier
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The remote rejected the version token; reload the file before retrying
    #[error("{path} changed on the remote since it was last read; reload it and retry ({message})")]
    WriteConflict { path: String, message: String },

    #[error("could not write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("{0} was not found")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Gateway(String),
}

pub type ForgeResult<T> = Result<T, ForgeError>;

impl ForgeError {
    /// Map a chat-completion failure.
    pub fn from_model(err: GatewayError) -> Self {
        match err.kind {
            GatewayErrorKind::AuthFailed => ForgeError::Authentication(err.message),
            GatewayErrorKind::NotFound => ForgeError::ModelUnavailable(err.message),
            GatewayErrorKind::Network => ForgeError::Network(err.message),
            GatewayErrorKind::Conflict | GatewayErrorKind::Generic => {
                ForgeError::Gateway(err.message)
            }
        }
    }

    /// Map a repository read / listing failure for `path`.
    pub fn from_read(path: &str, err: GatewayError) -> Self {
        match err.kind {
            GatewayErrorKind::AuthFailed => ForgeError::Authentication(err.message),
            GatewayErrorKind::NotFound => ForgeError::NotFound(path.to_string()),
            GatewayErrorKind::Network => ForgeError::Network(err.message),
            GatewayErrorKind::Conflict | GatewayErrorKind::Generic => {
                ForgeError::Gateway(err.message)
            }
        }
    }

    /// Map a repository write / delete failure for `path`.
    pub fn from_write(path: &str, err: GatewayError) -> Self {
        match err.kind {
            GatewayErrorKind::Conflict => ForgeError::WriteConflict {
                path: path.to_string(),
                message: err.message,
            },
            GatewayErrorKind::AuthFailed => ForgeError::Authentication(err.message),
            GatewayErrorKind::Network => ForgeError::Network(err.message),
            GatewayErrorKind::NotFound | GatewayErrorKind::Generic => ForgeError::WriteFailed {
                path: path.to_string(),
                message: err.message,
            },
        }
    }

    /// Whether the user should reload the file before retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ForgeError::WriteConflict { .. })
    }
}
