//! UI Pilot - grounded execution of natural-language UI test plans.
//!
//! This crate provides:
//! - A plan cursor that yields one atomic instruction at a time
//! - Snapshot-grounded command resolution (fast paths, a semantic backend,
//!   and a deterministic heuristic fallback)
//! - An execution policy with per-action retry budgets and error classification
//! - Run sessions that never overlap within a host slot
//! - Tiered verification of expected results against the run trace
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ui_pilot::automation::ProcessBackend;
//! use ui_pilot::resolver::GroundingResolver;
//! use ui_pilot::runner::{RunEngine, RunRequest};
//! use ui_pilot::session::SessionManager;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let sessions = SessionManager::new(Arc::new(ProcessBackend::new("ui-pilot-driver")));
//! let engine = RunEngine::new(sessions, GroundingResolver::heuristic_only());
//! let run = engine
//!     .run(RunRequest::new("1. Navigate to https://x.test/login\n2. 点击登录按钮"))
//!     .await?;
//! println!("{:?}", run.summary());
//! # Ok(())
//! # }
//! ```

pub mod automation;
pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod plan;
pub mod resolver;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod testcase;
pub mod text;
pub mod verify;

// Re-export error types
pub use error::{EngineError, EngineResult, ErrorKind};

// Re-export the engine surface
pub use execution::{ExecutionPolicy, StepOutcome};
pub use plan::{CursorOutcome, PlanCursor};
pub use resolver::{GroundingResolver, Resolution, ResolvedCommand};
pub use runner::{ExecutionRun, RunEngine, RunRequest, RunStatus};
pub use session::{RunSession, SessionManager};
pub use verify::{ExecutionTrace, ExpectedResultCheck, MatchType, OutcomeVerifier};

// Re-export semantic backend client
pub use llm::{ChatCompletionsBackend, LlmConfig, LlmError, SemanticBackend, check_health};
