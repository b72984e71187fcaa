//! Test case files.
//!
//! `.json` files hold a [`TestCase`] object. Any other file is read as
//! plain text or markdown: an optional `# title` line, the steps, and an
//! expected-results section.

pub mod types;

pub use types::{CaseError, CaseResult, TestCase, TextOrLines};

use std::path::Path;
use tracing::debug;

use crate::plan::{extract_expected_results, strip_expected_section};

/// Load a test case from disk
pub fn load_case(path: &Path) -> CaseResult<TestCase> {
    let raw = std::fs::read_to_string(path).map_err(|source| CaseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let mut case = if is_json {
        serde_json::from_str::<TestCase>(&raw).map_err(|source| CaseError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        parse_text_case(&raw)
    };

    if case.name.is_empty() {
        case.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("case")
            .to_string();
    }
    if case.steps.lines().iter().all(|l| l.trim().is_empty()) {
        return Err(CaseError::Empty(case.name));
    }
    debug!(case = %case.name, path = %path.display(), "test case loaded");
    Ok(case)
}

/// Parse a plain-text or markdown case
pub fn parse_text_case(raw: &str) -> TestCase {
    let mut name = String::new();
    let mut body = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if name.is_empty() && body.iter().all(|l: &&str| l.trim().is_empty()) && trimmed.starts_with("# ") {
            name = trimmed.trim_start_matches('#').trim().to_string();
            continue;
        }
        body.push(line);
    }
    let body = body.join("\n");

    TestCase {
        name,
        description: String::new(),
        start_url: None,
        steps: TextOrLines::Text(strip_expected_section(&body).trim().to_string()),
        expected_results: TextOrLines::Lines(extract_expected_results(&body)),
    }
}
