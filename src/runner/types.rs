//! Types for runs, steps and their reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::plan::SkippedLine;
use crate::resolver::{ResolutionSource, ResolvedCommand};
use crate::verify::{ExecutionTrace, ExpectedResultCheck};

/// Lifecycle of one atomic step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Resolving,
    Executing,
    Success,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }
}

/// One instruction of the plan and what became of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicStep {
    pub id: Uuid,

    /// 1-based position in the run
    pub order: usize,

    /// Instruction as extracted from the plan
    pub raw_text: String,

    pub status: StepStatus,

    /// Attempts beyond the first
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_command: Option<ResolvedCommand>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_source: Option<ResolutionSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Backend message confirming the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl AtomicStep {
    pub fn new(order: usize, raw_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order,
            raw_text: raw_text.into(),
            status: StepStatus::Pending,
            retry_count: 0,
            resolved_command: None,
            resolution_source: None,
            error: None,
            error_kind: None,
            verification_info: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Mark the step failed with an error
    pub fn fail(&mut self, error: impl Into<String>, kind: ErrorKind) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.error_kind = Some(kind);
        self.ended_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A human-readable event in a run's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, step: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            step,
            message: message.into(),
        }
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    /// Plan exhausted; individual steps may still have failed
    Completed,
    /// Aborted by a fatal classification
    Failed,
    /// Could not run at all (no session, internal failure)
    Error,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Error)
    }
}

/// What to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Natural-language plan, one instruction per line
    pub plan: String,

    /// Expected results; when empty they are taken from the plan's expected section
    #[serde(default)]
    pub expected_results: Vec<String>,

    /// Passed to the automation backend when the session opens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,

    /// Overrides the configured step budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

impl RunRequest {
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            ..Self::default()
        }
    }

    pub fn expect(mut self, expected: impl Into<String>) -> Self {
        self.expected_results.push(expected.into());
        self
    }
}

/// Complete state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub steps: Vec<AtomicStep>,
    pub logs: Vec<LogEntry>,
    pub trace: ExecutionTrace,

    /// Ids of steps that ended in success, in order
    pub successful_step_ids: Vec<Uuid>,

    /// Non-actionable plan lines passed over
    #[serde(default)]
    pub skipped: Vec<SkippedLine>,

    pub expected_results: Vec<String>,
    pub checks: Vec<ExpectedResultCheck>,

    /// Failed steps the run continued past
    pub failures: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    pub fn queued(expected_results: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Queued,
            steps: Vec::new(),
            logs: Vec::new(),
            trace: ExecutionTrace::new(),
            successful_step_ids: Vec::new(),
            skipped: Vec::new(),
            expected_results,
            checks: Vec::new(),
            failures: 0,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        RunSummary {
            id: self.id,
            status: self.status,
            total_steps: self.steps.len(),
            succeeded: count(StepStatus::Success),
            failed: count(StepStatus::Failed),
            skipped_lines: self.skipped.len(),
            checks_matched: self.checks.iter().filter(|c| c.matched).count(),
            checks_total: self.checks.len(),
            error: self.error.clone(),
        }
    }
}

/// Compact view of a run for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: RunStatus,
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_lines: usize,
    pub checks_matched: usize,
    pub checks_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
