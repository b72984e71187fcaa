//! Error taxonomy for the execution engine.
//!
//! Step-level errors are retried or downgraded inside the engine; only the
//! fatal classifications (`LoopStall`, `StepBudgetExceeded`,
//! `ResolutionFailed`, `CriticalActionFailed`, an unrecovered
//! `SessionDisconnected`) end a run early.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::automation::BackendError;
use crate::llm::LlmError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the plan cursor, resolver, execution policy and run loop
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("plan made no progress: remaining text unchanged ({remaining_len} chars)")]
    LoopStall { remaining_len: usize },

    #[error("step budget exceeded: more than {limit} steps")]
    StepBudgetExceeded { limit: usize },

    #[error("semantic resolution rejected: {0}")]
    ResolutionInvalid(String),

    #[error("semantic resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("automation session disconnected: {0}")]
    SessionDisconnected(String),

    #[error("invalid action: {0}")]
    ActionValidation(String),

    #[error("critical action '{action}' failed: {message}")]
    CriticalActionFailed { action: String, message: String },

    #[error("automation backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Classification reported to the run consumer
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::LoopStall { .. } => ErrorKind::LoopStall,
            EngineError::StepBudgetExceeded { .. } => ErrorKind::StepBudgetExceeded,
            EngineError::ResolutionInvalid(_) => ErrorKind::ResolutionInvalid,
            EngineError::ResolutionFailed(_) => ErrorKind::ResolutionFailed,
            EngineError::TargetNotFound(_) => ErrorKind::TargetNotFound,
            EngineError::SessionDisconnected(_) => ErrorKind::SessionDisconnected,
            EngineError::ActionValidation(_) => ErrorKind::ActionValidation,
            EngineError::CriticalActionFailed { .. } => ErrorKind::CriticalActionFailed,
            EngineError::Backend(_)
            | EngineError::Config(_)
            | EngineError::RunNotFound(_)
            | EngineError::Internal(_)
            | EngineError::Io(_)
            | EngineError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the run it occurred in
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Serializable mirror of [`EngineError`] used in step and run records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LoopStall,
    StepBudgetExceeded,
    ResolutionInvalid,
    ResolutionFailed,
    TargetNotFound,
    SessionDisconnected,
    ActionValidation,
    CriticalActionFailed,
    /// Timeout, network or transport failure that exhausted its retries
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::LoopStall
                | ErrorKind::StepBudgetExceeded
                | ErrorKind::ResolutionFailed
                | ErrorKind::CriticalActionFailed
        )
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Disconnected(msg) => EngineError::SessionDisconnected(msg),
            BackendError::InvalidCommand(msg) => EngineError::ActionValidation(msg),
            other => EngineError::Backend(other.to_string()),
        }
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        if err.is_unusable() {
            EngineError::ResolutionFailed(err.to_string())
        } else {
            EngineError::ResolutionInvalid(err.to_string())
        }
    }
}
