//! The run loop: one session, one cursor, steps strictly in order.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::observer::{RunObserver, TracingObserver};
use super::repository::{InMemoryRunRepository, RunRepository};
use super::types::{AtomicStep, ExecutionRun, LogEntry, LogLevel, RunRequest, RunStatus, StepStatus};
use crate::automation::SessionOptions;
use crate::config::{self, RetrySettings};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::execution::{ExecutionPolicy, StepOutcome};
use crate::plan::{CursorConfig, CursorOutcome, PlanCursor, SkippedLine, extract_expected_results};
use crate::resolver::GroundingResolver;
use crate::session::{RunSession, SessionManager};
use crate::snapshot::Snapshot;
use crate::verify::OutcomeVerifier;

/// Executes runs against sessions from a [`SessionManager`]
#[derive(Clone)]
pub struct RunEngine {
    sessions: SessionManager,
    resolver: GroundingResolver,
    policy: ExecutionPolicy,
    verifier: OutcomeVerifier,
    repository: Arc<dyn RunRepository>,
    observer: Arc<dyn RunObserver>,
    max_steps: usize,
    snapshot_timeout: Duration,
}

/// A run started with [`RunEngine::spawn`]
pub struct RunHandle {
    pub id: Uuid,
    task: JoinHandle<ExecutionRun>,
}

impl RunHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> EngineResult<ExecutionRun> {
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("run task failed: {}", e)))
    }
}

impl RunEngine {
    /// Engine with configured retry and verification settings, an in-memory
    /// repository and a tracing observer
    pub fn new(sessions: SessionManager, resolver: GroundingResolver) -> Self {
        let cfg = config::get();
        Self {
            sessions,
            policy: ExecutionPolicy::new(cfg.retry.clone(), resolver.clone()),
            resolver,
            verifier: OutcomeVerifier::default(),
            repository: Arc::new(InMemoryRunRepository::new()),
            observer: Arc::new(TracingObserver),
            max_steps: cfg.engine.max_steps,
            snapshot_timeout: cfg.engine.snapshot_timeout,
        }
    }

    pub fn with_retry(mut self, settings: RetrySettings) -> Self {
        self.policy = ExecutionPolicy::new(settings, self.resolver.clone());
        self
    }

    pub fn with_verifier(mut self, verifier: OutcomeVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn RunRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.repository
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Execute a run to completion
    pub async fn run(&self, request: RunRequest) -> EngineResult<ExecutionRun> {
        let run = self.enqueue(&request).await?;
        Ok(self.execute(run, request).await)
    }

    /// Start a run in the background; independent runs proceed concurrently,
    /// limited only by the session slots
    pub async fn spawn(&self, request: RunRequest) -> EngineResult<RunHandle> {
        let run = self.enqueue(&request).await?;
        let id = run.id;
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.execute(run, request).await });
        Ok(RunHandle { id, task })
    }

    async fn enqueue(&self, request: &RunRequest) -> EngineResult<ExecutionRun> {
        let expected = if request.expected_results.is_empty() {
            extract_expected_results(&request.plan)
        } else {
            request.expected_results.clone()
        };
        let run = ExecutionRun::queued(expected);
        self.repository.create(run.clone()).await?;
        debug!(run = %run.id, "run queued");
        Ok(run)
    }

    async fn execute(&self, mut run: ExecutionRun, request: RunRequest) -> ExecutionRun {
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.persist(&run).await;
        info!(run = %run.id, backend = self.sessions.backend_name(), "run started");

        let options = SessionOptions {
            run_id: run.id.to_string(),
            start_url: request.start_url.clone(),
            headless: true,
        };
        let mut session = match self.sessions.open(options).await {
            Ok(session) => session,
            Err(err) => {
                self.log(&mut run, LogLevel::Error, None, format!("could not open session: {}", err));
                run.status = RunStatus::Error;
                run.error_kind = Some(err.kind());
                run.error = Some(err.to_string());
                return self.finish(run).await;
            }
        };

        let max_steps = request.max_steps.unwrap_or(self.max_steps);
        let result = self.drive(&mut run, &mut session, &request.plan, max_steps).await;

        // the landing page is evidence for verification
        if let Ok(snapshot) = session.capture_snapshot(self.snapshot_timeout).await {
            observe_page(&mut run, &snapshot);
        }
        if let Err(err) = session.close().await {
            self.log(&mut run, LogLevel::Warn, None, format!("session close failed: {}", err));
        }

        match result {
            Ok(()) => run.status = RunStatus::Completed,
            Err(err) => {
                let kind = err.kind();
                run.status = if kind == ErrorKind::Internal {
                    RunStatus::Error
                } else {
                    RunStatus::Failed
                };
                self.log(&mut run, LogLevel::Error, None, format!("run aborted: {}", err));
                run.error_kind = Some(kind);
                run.error = Some(err.to_string());
            }
        }
        self.finish(run).await
    }

    /// Step loop. Returns `Err` for anything that ends the run early.
    async fn drive(
        &self,
        run: &mut ExecutionRun,
        session: &mut RunSession,
        plan: &str,
        max_steps: usize,
    ) -> EngineResult<()> {
        let mut cursor = PlanCursor::new(CursorConfig { max_steps });
        let mut remaining = plan.to_string();

        loop {
            let next = match cursor.next(&remaining)? {
                CursorOutcome::Exhausted { skipped } => {
                    self.record_skipped(run, skipped);
                    info!(run = %run.id, steps = run.steps.len(), "plan exhausted");
                    return Ok(());
                }
                CursorOutcome::Step(next) => next,
            };
            self.record_skipped(run, next.skipped);
            remaining = next.remaining_text;
            let instruction = next.instruction;

            let mut step = AtomicStep::new(next.order, instruction.clone());
            step.status = StepStatus::Resolving;
            step.started_at = Some(Utc::now());
            run.steps.push(step);
            let idx = run.steps.len() - 1;
            self.observer.on_step(run.id, &run.steps[idx]);

            let snapshot = match session.capture_snapshot(self.snapshot_timeout).await {
                Ok(snapshot) => {
                    observe_page(run, &snapshot);
                    Some(snapshot)
                }
                Err(EngineError::SessionDisconnected(msg)) => {
                    self.fail_step(run, idx, msg.clone(), ErrorKind::SessionDisconnected);
                    self.reconnect(run, session, next.order, &msg).await?;
                    continue;
                }
                Err(err) => {
                    self.log(
                        run,
                        LogLevel::Warn,
                        Some(next.order),
                        format!("snapshot unavailable, resolving without one: {}", err),
                    );
                    None
                }
            };

            let resolution = match self.resolver.resolve(&instruction, snapshot.as_ref()).await {
                Ok(resolution) => resolution,
                Err(err) => {
                    self.fail_step(run, idx, err.to_string(), err.kind());
                    if err.is_fatal() {
                        return Err(err);
                    }
                    run.failures += 1;
                    self.log(run, LogLevel::Warn, Some(next.order), format!("step not resolved: {}", err));
                    continue;
                }
            };
            if let Some(reason) = &resolution.degraded {
                self.log(
                    run,
                    LogLevel::Warn,
                    Some(next.order),
                    format!("heuristic resolution used: {}", reason),
                );
            }

            {
                let step = &mut run.steps[idx];
                step.status = StepStatus::Executing;
                step.resolved_command = Some(resolution.command.clone());
                step.resolution_source = Some(resolution.source);
            }
            self.observer.on_step(run.id, &run.steps[idx]);

            let outcome = self.policy.run(session, &instruction, resolution.command).await;
            run.trace.record_step(
                next.order,
                &instruction,
                Some(&outcome.command),
                if outcome.success {
                    Some(outcome.message.as_str())
                } else {
                    outcome.error.as_deref()
                },
                outcome.success,
            );

            if outcome.success {
                let step = &mut run.steps[idx];
                step.status = StepStatus::Success;
                step.retry_count = outcome.retry_count;
                step.resolved_command = Some(outcome.command);
                step.verification_info = outcome.verification_info;
                step.ended_at = Some(Utc::now());
                run.successful_step_ids.push(step.id);
                self.observer.on_step(run.id, &run.steps[idx]);
                self.persist(run).await;
                continue;
            }

            self.continue_after_failure(run, session, idx, outcome).await?;
            self.persist(run).await;
        }
    }

    /// Decide whether the run survives a failed step
    async fn continue_after_failure(
        &self,
        run: &mut ExecutionRun,
        session: &mut RunSession,
        idx: usize,
        outcome: StepOutcome,
    ) -> EngineResult<()> {
        let order = run.steps[idx].order;
        let message = outcome.error.clone().unwrap_or_else(|| "step failed".to_string());
        let kind = outcome.error_kind.unwrap_or(ErrorKind::Internal);
        {
            let step = &mut run.steps[idx];
            step.retry_count = outcome.retry_count;
            step.resolved_command = Some(outcome.command.clone());
        }
        self.fail_step(run, idx, message.clone(), kind);

        if kind == ErrorKind::SessionDisconnected {
            return self.reconnect(run, session, order, &message).await;
        }
        if outcome.command.kind().is_critical() {
            return Err(EngineError::CriticalActionFailed {
                action: outcome.command.kind().as_str().to_string(),
                message,
            });
        }
        if kind == ErrorKind::ResolutionFailed {
            return Err(EngineError::ResolutionFailed(message));
        }

        run.failures += 1;
        self.log(
            run,
            LogLevel::Warn,
            Some(order),
            format!("step {} failed, continuing: {}", order, message),
        );
        Ok(())
    }

    /// One reconnect per disconnect; the failed step stays failed
    async fn reconnect(
        &self,
        run: &mut ExecutionRun,
        session: &mut RunSession,
        order: usize,
        reason: &str,
    ) -> EngineResult<()> {
        self.log(
            run,
            LogLevel::Warn,
            Some(order),
            format!("session lost ({}), reconnecting", reason),
        );
        session.reconnect().await?;
        run.failures += 1;
        self.log(run, LogLevel::Info, Some(order), "session reconnected");
        Ok(())
    }

    fn fail_step(&self, run: &mut ExecutionRun, idx: usize, error: String, kind: ErrorKind) {
        run.steps[idx].fail(error, kind);
        self.observer.on_step(run.id, &run.steps[idx]);
    }

    fn record_skipped(&self, run: &mut ExecutionRun, skipped: Vec<SkippedLine>) {
        for line in skipped {
            if line.assertion {
                self.log(run, LogLevel::Info, None, format!("verification line skipped: {}", line.text));
            }
            run.skipped.push(line);
        }
    }

    fn log(&self, run: &mut ExecutionRun, level: LogLevel, step: Option<usize>, message: impl Into<String>) {
        let entry = LogEntry::new(level, step, message);
        self.observer.on_log(run.id, &entry);
        run.logs.push(entry);
    }

    async fn persist(&self, run: &ExecutionRun) {
        if let Err(err) = self.repository.update(run).await {
            warn!(run = %run.id, error = %err, "failed to store run");
        }
    }

    async fn finish(&self, mut run: ExecutionRun) -> ExecutionRun {
        run.checks = self.verifier.verify(&run.expected_results, &run.trace);
        for check in &run.checks {
            self.observer.on_check(run.id, check);
        }
        run.ended_at = Some(Utc::now());
        self.persist(&run).await;
        self.observer.on_finished(&run);
        run
    }
}

fn observe_page(run: &mut ExecutionRun, snapshot: &Snapshot) {
    run.trace
        .record_page(snapshot.page_title.as_deref(), snapshot.page_url.as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ScriptedBackend, ScriptedOutcome};
    use crate::runner::observer::NoopObserver;

    fn engine(backend: &ScriptedBackend) -> RunEngine {
        let sessions = SessionManager::with_slots(Arc::new(backend.clone()), 1);
        RunEngine::new(sessions, GroundingResolver::heuristic_only())
            .with_retry(RetrySettings::defaults().without_backoff())
            .with_observer(Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_failed_click_continues() {
        let backend = ScriptedBackend::new().with_outcomes([
            ScriptedOutcome::Failure("element not found".into()),
            ScriptedOutcome::Failure("element not found".into()),
            ScriptedOutcome::Failure("element not found".into()),
        ]);
        let run = engine(&backend)
            .run(RunRequest::new("点击保存按钮\n点击返回"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.failures, 1);
        assert_eq!(run.steps[0].status, StepStatus::Failed);
        assert_eq!(run.steps[0].error_kind, Some(ErrorKind::TargetNotFound));
        assert_eq!(run.steps[1].status, StepStatus::Success);
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_budget_fails_run() {
        let backend = ScriptedBackend::new();
        let run = engine(&backend)
            .with_max_steps(2)
            .run(RunRequest::new("点击a\n点击b\n点击c"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_kind, Some(ErrorKind::StepBudgetExceeded));
        assert_eq!(run.steps.len(), 2);
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_open_failure_is_error() {
        let backend = ScriptedBackend::new().failing_opens(1);
        let run = engine(&backend).run(RunRequest::new("点击登录")).await.unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.steps.is_empty());
    }

    #[tokio::test]
    async fn test_run_is_stored() {
        let backend = ScriptedBackend::new();
        let engine = engine(&backend);
        let run = engine.run(RunRequest::new("点击登录")).await.unwrap();
        let stored = engine.repository().get(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.successful_step_ids, run.successful_step_ids);
    }
}
