pub mod candidates;
pub mod parse;
pub mod types;

pub use candidates::{Candidate, extract_candidates, render_candidates, truncate_chars};
pub use parse::{parse_aria_text, parse_snapshot, require_elements};
pub use types::{ElementRole, Snapshot, SnapshotElement};
