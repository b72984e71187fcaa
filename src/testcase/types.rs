use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::runner::RunRequest;

/// Steps or expected results: one block of text or a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrLines {
    Text(String),
    Lines(Vec<String>),
}

impl Default for TextOrLines {
    fn default() -> Self {
        TextOrLines::Lines(Vec::new())
    }
}

impl TextOrLines {
    pub fn lines(&self) -> Vec<String> {
        match self {
            TextOrLines::Text(text) => text.lines().map(str::to_string).collect(),
            TextOrLines::Lines(lines) => lines.clone(),
        }
    }
}

/// A test case as authored: a plan plus what should come of it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Name of the case (e.g., "login with valid credentials")
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Page opened before the first step
    #[serde(default, alias = "start_url", alias = "url", skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,

    /// Natural-language instructions
    #[serde(default)]
    pub steps: TextOrLines,

    #[serde(default, alias = "expected_results", alias = "expected")]
    pub expected_results: TextOrLines,
}

impl TestCase {
    /// Plan text handed to the run; a start URL becomes a leading navigate step
    pub fn plan(&self) -> String {
        let mut lines = Vec::new();
        if let Some(url) = self.start_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            lines.push(format!("Navigate to {}", url));
        }
        lines.extend(self.steps.lines().into_iter().filter(|l| !l.trim().is_empty()));
        lines.join("\n")
    }

    pub fn expected(&self) -> Vec<String> {
        self.expected_results
            .lines()
            .into_iter()
            .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    pub fn into_request(self) -> RunRequest {
        RunRequest {
            plan: self.plan(),
            expected_results: self.expected(),
            start_url: self.start_url.clone(),
            max_steps: None,
        }
    }
}

/// Result type for test case loading
pub type CaseResult<T> = Result<T, CaseError>;

/// Error types for test case loading
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid test case JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("test case {0} has no steps")]
    Empty(String),
}
