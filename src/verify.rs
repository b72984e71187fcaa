//! Outcome verification: scores declared expected results against the
//! execution trace of a finished run.
//!
//! Tiers, first hit wins:
//! 1. `exact`: the normalized expected text occurs verbatim in the trace
//! 2. `partial`: at least `partial_ratio` of its keywords occur in the trace
//! 3. `contains`: at least `contains_ratio` of its keywords occur
//! 4. `not_matched`: otherwise; an entry sharing a keyword is kept as evidence

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{self, VerifySettings};
use crate::resolver::ResolvedCommand;
use crate::snapshot::truncate_chars;
use crate::text::{keywords, normalize};

/// How an expected result was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    Contains,
    NotMatched,
}

impl MatchType {
    pub fn is_match(self) -> bool {
        !matches!(self, MatchType::NotMatched)
    }
}

/// Verdict for one expected result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResultCheck {
    pub expected: String,
    /// Best evidence from the trace, or a summary of the successful steps
    pub actual: String,
    pub matched: bool,
    pub match_type: MatchType,
}

/// One line of the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step order, absent for page observations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub text: String,
    pub success: bool,
}

/// Append-only record of what a run did and saw
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step: its instruction, the action phrase and the backend message
    pub fn record_step(
        &mut self,
        step: usize,
        instruction: &str,
        command: Option<&ResolvedCommand>,
        message: Option<&str>,
        success: bool,
    ) {
        let mut parts = vec![instruction.trim().to_string()];
        if let Some(command) = command {
            if success {
                parts.push(command.trace_phrase());
            }
        }
        if let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) {
            if !parts.iter().any(|p| p == message) {
                parts.push(message.to_string());
            }
        }
        self.entries.push(TraceEntry {
            step: Some(step),
            text: parts.join(" | "),
            success,
        });
    }

    /// Record the page a snapshot showed
    pub fn record_page(&mut self, title: Option<&str>, url: Option<&str>) {
        let text = match (title.filter(|t| !t.is_empty()), url.filter(|u| !u.is_empty())) {
            (Some(title), Some(url)) => format!("page {} ({})", title, url),
            (Some(title), None) => format!("page {}", title),
            (None, Some(url)) => format!("page {}", url),
            (None, None) => return,
        };
        if self.entries.last().is_some_and(|last| last.step.is_none() && last.text == text) {
            return;
        }
        self.entries.push(TraceEntry {
            step: None,
            text,
            success: true,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whole trace as one text, one entry per line
    pub fn text(&self) -> String {
        self.entries.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n")
    }

    fn successful_steps(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.step.is_some() && e.success)
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Scores expected results against a trace
#[derive(Debug, Clone)]
pub struct OutcomeVerifier {
    settings: VerifySettings,
}

impl Default for OutcomeVerifier {
    fn default() -> Self {
        Self::new(config::get().verify.clone())
    }
}

impl OutcomeVerifier {
    pub fn new(settings: VerifySettings) -> Self {
        Self { settings }
    }

    /// One check per non-blank expected result, in order
    pub fn verify(&self, expected: &[String], trace: &ExecutionTrace) -> Vec<ExpectedResultCheck> {
        let haystack = normalize(&trace.text());
        expected
            .iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| self.check(e, &haystack, trace))
            .collect()
    }

    fn check(&self, expected: &str, haystack: &str, trace: &ExecutionTrace) -> ExpectedResultCheck {
        let needle = normalize(expected);
        let limit = self.settings.evidence_max_chars;
        let verdict = |match_type: MatchType, actual: &str| ExpectedResultCheck {
            expected: expected.trim().to_string(),
            actual: truncate_chars(actual, limit),
            matched: match_type.is_match(),
            match_type,
        };

        if haystack.contains(&needle) {
            let evidence = trace
                .entries()
                .iter()
                .find(|e| normalize(&e.text).contains(&needle))
                .map(|e| e.text.clone())
                .unwrap_or_else(|| needle.clone());
            debug!(expected, "expected result matched exactly");
            return verdict(MatchType::Exact, &evidence);
        }

        let words = keywords(expected, self.settings.min_keyword_chars);
        let best = best_entry(trace, &words);

        if !words.is_empty() {
            let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
            let ratio = hits as f64 / words.len() as f64;
            debug!(expected, hits, total = words.len(), ratio, "keyword overlap");

            let match_type = if ratio >= self.settings.partial_ratio {
                Some(MatchType::Partial)
            } else if ratio >= self.settings.contains_ratio {
                Some(MatchType::Contains)
            } else {
                None
            };
            if let Some(match_type) = match_type {
                let evidence = best.map(|e| e.text.clone()).unwrap_or_else(|| trace.text());
                return verdict(match_type, &evidence);
            }
        }

        match best {
            Some(entry) => verdict(MatchType::NotMatched, &entry.text),
            None => verdict(MatchType::NotMatched, &trace.successful_steps()),
        }
    }
}

/// Entry sharing the most keywords; ties keep the earliest
fn best_entry<'a>(trace: &'a ExecutionTrace, words: &[String]) -> Option<&'a TraceEntry> {
    let mut best: Option<(&TraceEntry, usize)> = None;
    for entry in trace.entries() {
        let text = normalize(&entry.text);
        let shared = words.iter().filter(|w| text.contains(w.as_str())).count();
        if shared > 0 && best.is_none_or(|(_, n)| shared > n) {
            best = Some((entry, shared));
        }
    }
    best.map(|(entry, _)| entry)
}

/// Score `expected` against `trace` with the configured thresholds
pub fn verify(expected: &[String], trace: &ExecutionTrace) -> Vec<ExpectedResultCheck> {
    OutcomeVerifier::default().verify(expected, trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Target;
    use pretty_assertions::assert_eq;

    fn verifier() -> OutcomeVerifier {
        OutcomeVerifier::new(VerifySettings::defaults())
    }

    fn expected(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn test_exact_match() {
        let mut trace = ExecutionTrace::new();
        trace.record_step(1, "点击登录按钮", None, Some("登录成功并跳转到首页"), true);
        let checks = verifier().verify(&expected("登录成功并跳转到首页"), &trace);
        assert_eq!(checks[0].match_type, MatchType::Exact);
        assert!(checks[0].matched);
    }

    #[test]
    fn test_three_of_four_keywords_is_contains() {
        let mut trace = ExecutionTrace::new();
        trace.record_step(1, "点击登录按钮", None, Some("成功 跳转"), true);
        let checks = verifier().verify(&expected("登录成功并跳转到首页"), &trace);
        assert_eq!(checks[0].match_type, MatchType::Contains);
        assert!(checks[0].matched);
    }

    #[test]
    fn test_all_keywords_scattered_is_partial() {
        let mut trace = ExecutionTrace::new();
        trace.record_step(1, "点击登录按钮", None, Some("操作成功"), true);
        trace.record_page(Some("首页"), None);
        trace.record_step(2, "跳转检查", None, None, true);
        let checks = verifier().verify(&expected("登录成功并跳转到首页"), &trace);
        assert_eq!(checks[0].match_type, MatchType::Partial);
    }

    #[test]
    fn test_one_keyword_keeps_evidence_but_fails() {
        let mut trace = ExecutionTrace::new();
        trace.record_step(1, "点击登录按钮", None, None, true);
        trace.record_step(2, "打开设置", None, None, true);
        let checks = verifier().verify(&expected("登录成功并跳转到首页"), &trace);
        assert_eq!(checks[0].match_type, MatchType::NotMatched);
        assert!(!checks[0].matched);
        assert_eq!(checks[0].actual, "点击登录按钮");
    }

    #[test]
    fn test_no_evidence_summarizes_successful_steps() {
        let mut trace = ExecutionTrace::new();
        trace.record_step(1, "打开设置", None, None, true);
        trace.record_step(2, "保存", None, Some("timeout"), false);
        let checks = verifier().verify(&expected("登录成功并跳转到首页"), &trace);
        assert!(!checks[0].matched);
        assert_eq!(checks[0].actual, "打开设置");
    }

    #[test]
    fn test_trace_phrases_and_truncation() {
        let mut trace = ExecutionTrace::new();
        let click = ResolvedCommand::Click {
            target: Target::by_ref("e3", Some("Submit".into())),
            double: false,
        };
        trace.record_step(1, "click submit", Some(&click), Some("clicked Submit"), true);
        assert_eq!(trace.entries()[0].text, "click submit | clicked Submit");

        let settings = VerifySettings {
            evidence_max_chars: 5,
            ..VerifySettings::defaults()
        };
        let checks = OutcomeVerifier::new(settings).verify(&expected("Clicked Submit"), &trace);
        assert_eq!(checks[0].match_type, MatchType::Exact);
        assert_eq!(checks[0].actual.chars().count(), 5);
    }

    #[test]
    fn test_blank_expectations_are_ignored() {
        let trace = ExecutionTrace::new();
        assert!(verifier().verify(&["  ".to_string()], &trace).is_empty());
    }
}
