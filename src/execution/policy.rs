//! Execution policy: runs one resolved command through its strategy list
//! with per-strategy attempt budgets, error classification and backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classify::{ErrorClass, classify_error, error_kind_for};
use crate::config::{self, RetrySettings};
use crate::error::{EngineError, ErrorKind};
use crate::resolver::{ActionKind, GroundingResolver, ResolvedCommand};
use crate::session::RunSession;

/// How an attempt obtains its command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Execute the command as resolved
    Standard,
    /// Capture a fresh snapshot and re-resolve the instruction first
    Alternative,
}

/// Strategies tried, in order, for an action kind
pub fn strategies_for(kind: ActionKind) -> &'static [Strategy] {
    match kind {
        ActionKind::Click | ActionKind::Type | ActionKind::SelectOption | ActionKind::Hover => {
            &[Strategy::Standard, Strategy::Alternative]
        }
        ActionKind::Navigate
        | ActionKind::NavigateBack
        | ActionKind::PressKey
        | ActionKind::Wait
        | ActionKind::TabSwitch => &[Strategy::Standard],
    }
}

/// Result of executing one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    /// Command of the last attempt; differs from the input after re-resolution
    pub command: ResolvedCommand,
    /// Backend message of the successful attempt
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    /// Attempts beyond the first
    pub retry_count: u32,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_info: Option<String>,
}

impl StepOutcome {
    fn failure(command: ResolvedCommand, error: String, kind: ErrorKind, attempts: u32, strategy: Strategy) -> Self {
        Self {
            success: false,
            command,
            message: String::new(),
            error: Some(error),
            error_kind: Some(kind),
            attempts,
            retry_count: attempts.saturating_sub(1),
            strategy,
            verification_info: None,
        }
    }
}

/// Runs commands against a session with retries
#[derive(Clone)]
pub struct ExecutionPolicy {
    settings: RetrySettings,
    resolver: GroundingResolver,
    snapshot_timeout: Duration,
}

impl ExecutionPolicy {
    pub fn new(settings: RetrySettings, resolver: GroundingResolver) -> Self {
        Self {
            settings,
            resolver,
            snapshot_timeout: config::get().engine.snapshot_timeout,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Execute `command` (resolved from `instruction`) until it succeeds, a
    /// non-retryable error occurs, or every strategy's budget is spent.
    pub async fn run(&self, session: &mut RunSession, instruction: &str, command: ResolvedCommand) -> StepOutcome {
        let kind = command.kind();
        let mut current = command;
        let mut attempts: u32 = 0;
        let mut last_error = String::from("no attempt made");
        let mut last_strategy = Strategy::Standard;

        for &strategy in strategies_for(kind) {
            last_strategy = strategy;
            let budget = match strategy {
                Strategy::Standard => self.settings.attempts_for(kind),
                Strategy::Alternative => self.settings.alternative_attempts,
            };
            if budget == 0 {
                continue;
            }

            if strategy == Strategy::Alternative {
                match self.re_resolve(session, instruction).await {
                    Ok(next) => {
                        debug!(instruction, command = %next.describe(), "re-resolved for alternative strategy");
                        current = next;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        warn!(instruction, error = %message, "alternative strategy could not re-resolve");
                        let kind = match &err {
                            EngineError::ResolutionFailed(_) => ErrorKind::ResolutionFailed,
                            EngineError::SessionDisconnected(_) => ErrorKind::SessionDisconnected,
                            _ => error_kind_for(&last_error),
                        };
                        let reported = if kind == ErrorKind::ResolutionFailed || kind == ErrorKind::SessionDisconnected {
                            message
                        } else {
                            last_error
                        };
                        return StepOutcome::failure(current, reported, kind, attempts, strategy);
                    }
                }
            }

            for _ in 0..budget {
                if attempts > 0 {
                    let delay = self.settings.backoff(attempts);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                attempts += 1;

                let timeout = self.settings.timeouts.for_kind(current.kind(), current.wait_duration());
                let error = match session.execute(&current, timeout).await {
                    Ok(outcome) if outcome.success => {
                        info!(
                            command = %current.describe(),
                            attempts,
                            strategy = ?strategy,
                            "step succeeded"
                        );
                        let verification_info = (!outcome.message.trim().is_empty()).then(|| outcome.message.clone());
                        return StepOutcome {
                            success: true,
                            command: current,
                            message: outcome.message,
                            error: None,
                            error_kind: None,
                            attempts,
                            retry_count: attempts - 1,
                            strategy,
                            verification_info,
                        };
                    }
                    Ok(outcome) => outcome.error.unwrap_or_else(|| "action reported failure".to_string()),
                    Err(err) => err.to_string(),
                };

                let class = classify_error(&error);
                warn!(command = %current.describe(), attempt = attempts, ?class, error = %error, "attempt failed");
                match class {
                    ErrorClass::Retryable => last_error = error,
                    ErrorClass::NonRetryable | ErrorClass::Disconnected => {
                        let kind = error_kind_for(&error);
                        return StepOutcome::failure(current, error, kind, attempts, strategy);
                    }
                }
            }
        }

        let kind = error_kind_for(&last_error);
        StepOutcome::failure(current, last_error, kind, attempts, last_strategy)
    }

    async fn re_resolve(&self, session: &mut RunSession, instruction: &str) -> Result<ResolvedCommand, EngineError> {
        let snapshot = session.capture_snapshot(self.snapshot_timeout).await?;
        let resolution = self.resolver.resolve(instruction, Some(&snapshot)).await?;
        Ok(resolution.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ScriptedBackend, ScriptedOutcome, SessionOptions};
    use crate::resolver::Target;
    use crate::session::SessionManager;
    use std::sync::Arc;

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy::new(RetrySettings::defaults().without_backoff(), GroundingResolver::heuristic_only())
    }

    async fn session_for(backend: &ScriptedBackend) -> RunSession {
        SessionManager::with_slots(Arc::new(backend.clone()), 1)
            .open(SessionOptions::for_run("test"))
            .await
            .unwrap()
    }

    fn click() -> ResolvedCommand {
        ResolvedCommand::Click {
            target: Target::described("点击登录按钮"),
            double: false,
        }
    }

    #[test]
    fn test_strategy_lists() {
        assert_eq!(strategies_for(ActionKind::Navigate), &[Strategy::Standard]);
        assert_eq!(strategies_for(ActionKind::Click), &[Strategy::Standard, Strategy::Alternative]);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let backend = ScriptedBackend::new().with_outcomes([ScriptedOutcome::Failure("timeout".into())]);
        let mut session = session_for(&backend).await;
        let outcome = policy().run(&mut session, "点击登录按钮", click()).await;
        assert!(outcome.success);
        assert_eq!(outcome.retry_count, 1);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.strategy, Strategy::Standard);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let backend = ScriptedBackend::new().with_outcomes([ScriptedOutcome::Failure("invalid argument: ref".into())]);
        let mut session = session_for(&backend).await;
        let outcome = policy().run(&mut session, "点击登录按钮", click()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ActionValidation));
        assert_eq!(backend.executed().await.len(), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_alternative_strategy_after_standard_budget() {
        let backend = ScriptedBackend::new().with_outcomes([
            ScriptedOutcome::Failure("element not found".into()),
            ScriptedOutcome::Failure("element not found".into()),
        ]);
        let mut session = session_for(&backend).await;
        let outcome = policy().run(&mut session, "点击登录按钮", click()).await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy, Strategy::Alternative);
        assert_eq!(outcome.attempts, 3);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails() {
        let backend = ScriptedBackend::new().with_outcomes([
            ScriptedOutcome::Failure("timeout".into()),
            ScriptedOutcome::Failure("timeout".into()),
        ]);
        let mut session = session_for(&backend).await;
        let navigate = ResolvedCommand::Navigate {
            url: "https://x.test".into(),
        };
        let outcome = policy().run(&mut session, "Navigate to https://x.test", navigate).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Transient));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_reported_without_retry() {
        let backend = ScriptedBackend::new().with_outcomes([ScriptedOutcome::Disconnect("browser crashed".into())]);
        let mut session = session_for(&backend).await;
        let outcome = policy().run(&mut session, "点击登录按钮", click()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error_kind, Some(ErrorKind::SessionDisconnected));
        session.close().await.unwrap();
    }
}
