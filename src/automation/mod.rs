//! Automation backend surface: opening sessions, capturing snapshots and
//! executing resolved commands. The engine never looks past these traits.

pub mod process;
pub mod scripted;

pub use process::ProcessBackend;
pub use scripted::{ScriptedBackend, ScriptedOutcome, SessionEvent};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::resolver::ResolvedCommand;
use crate::snapshot::Snapshot;

/// Result type for automation backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Transport and protocol failures of an automation backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("session disconnected: {0}")]
    Disconnected(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("failed to open session: {0}")]
    Open(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for a new automation session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Run the session belongs to
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(default)]
    pub headless: bool,
}

impl SessionOptions {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_url: None,
            headless: true,
        }
    }
}

/// What the backend reports for one executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Opens automation sessions
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    async fn open_session(&self, options: &SessionOptions) -> BackendResult<Box<dyn AutomationSession>>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// One live automation session
#[async_trait]
pub trait AutomationSession: Send {
    /// Backend-issued session identifier
    fn id(&self) -> &str;

    /// Capture a fresh snapshot of the current page
    async fn capture_snapshot(&mut self) -> BackendResult<Snapshot>;

    /// Execute a command. Action failures come back as an unsuccessful
    /// outcome; transport failures as an error.
    async fn execute(&mut self, command: &ResolvedCommand, timeout: Duration) -> BackendResult<ExecutionOutcome>;

    /// Close the session and release its resources
    async fn close(&mut self) -> BackendResult<()>;
}
