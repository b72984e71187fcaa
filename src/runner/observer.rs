//! Run consumers: receive step updates, log entries and verification
//! results as they are produced.

use tracing::{info, warn};
use uuid::Uuid;

use super::types::{AtomicStep, ExecutionRun, LogEntry, LogLevel, StepStatus};
use crate::verify::ExpectedResultCheck;

/// Callbacks invoked by the run loop. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn on_step(&self, _run_id: Uuid, _step: &AtomicStep) {}

    fn on_log(&self, _run_id: Uuid, _entry: &LogEntry) {}

    fn on_check(&self, _run_id: Uuid, _check: &ExpectedResultCheck) {}

    fn on_finished(&self, _run: &ExecutionRun) {}
}

/// Ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Forwards run progress to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_step(&self, run_id: Uuid, step: &AtomicStep) {
        if !step.status.is_terminal() {
            return;
        }
        match step.status {
            StepStatus::Failed => warn!(
                run = %run_id,
                step = step.order,
                instruction = %step.raw_text,
                error = step.error.as_deref().unwrap_or(""),
                "step failed"
            ),
            _ => info!(
                run = %run_id,
                step = step.order,
                instruction = %step.raw_text,
                retries = step.retry_count,
                "step succeeded"
            ),
        }
    }

    fn on_log(&self, run_id: Uuid, entry: &LogEntry) {
        match entry.level {
            LogLevel::Info => info!(run = %run_id, step = ?entry.step, "{}", entry.message),
            LogLevel::Warn | LogLevel::Error => warn!(run = %run_id, step = ?entry.step, "{}", entry.message),
        }
    }

    fn on_check(&self, run_id: Uuid, check: &ExpectedResultCheck) {
        info!(
            run = %run_id,
            expected = %check.expected,
            matched = check.matched,
            match_type = ?check.match_type,
            "expected result checked"
        );
    }

    fn on_finished(&self, run: &ExecutionRun) {
        let summary = run.summary();
        info!(
            run = %run.id,
            status = ?summary.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "run finished"
        );
    }
}
