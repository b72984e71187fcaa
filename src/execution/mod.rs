//! Step execution: retry policy and error classification.

mod classify;
mod policy;

pub use classify::{ErrorClass, classify_error, error_kind_for};
pub use policy::{ExecutionPolicy, StepOutcome, Strategy, strategies_for};
