pub mod cursor;
pub mod lexicon;

pub use cursor::{CursorConfig, CursorOutcome, NextInstruction, PlanCursor, SkippedLine, preview};
pub use lexicon::{extract_expected_results, is_assertion, strip_enumeration, strip_expected_section};
