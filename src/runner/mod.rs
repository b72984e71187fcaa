//! Runs: the step loop, run records, storage and observers.

pub mod engine;
pub mod observer;
pub mod repository;
pub mod types;

pub use engine::{RunEngine, RunHandle};
pub use observer::{NoopObserver, RunObserver, TracingObserver};
pub use repository::{InMemoryRunRepository, RunRepository};
pub use types::{AtomicStep, ExecutionRun, LogEntry, LogLevel, RunRequest, RunStatus, RunSummary, StepStatus};
