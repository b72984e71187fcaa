//! The plan cursor: yields one atomic instruction at a time from the
//! remaining plan text, with stall detection and a step budget.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::lexicon::{LineClass, SkipReason, classify_line, split_compound, strip_expected_section};
use crate::config;
use crate::error::{EngineError, EngineResult};

/// Cursor settings
#[derive(Debug, Clone)]
pub struct CursorConfig {
    /// Maximum number of instructions emitted for one run
    pub max_steps: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            max_steps: config::get().engine.max_steps,
        }
    }
}

/// An instruction extracted from the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextInstruction {
    /// Normalized instruction text (enumeration markers removed)
    pub instruction: String,
    /// Plan text left after this instruction
    pub remaining_text: String,
    /// 1-based order of this instruction within the run
    pub order: usize,
    /// Lines passed over to reach this instruction
    pub skipped: Vec<SkippedLine>,
}

/// A non-actionable line the cursor passed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub text: String,
    pub assertion: bool,
}

/// What one cursor advance produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorOutcome {
    Step(NextInstruction),
    /// No instructions left; a successful end of the plan
    Exhausted { skipped: Vec<SkippedLine> },
}

/// Stateful plan cursor for one run.
///
/// Each call to [`PlanCursor::next`] receives the current plan text. Passing
/// the same text twice in a row is a stall; emitting more than
/// `max_steps` instructions exceeds the budget. Both are fatal.
#[derive(Debug)]
pub struct PlanCursor {
    config: CursorConfig,
    emitted: usize,
    last_input: Option<String>,
}

impl PlanCursor {
    pub fn new(config: CursorConfig) -> Self {
        Self {
            config,
            emitted: 0,
            last_input: None,
        }
    }

    pub fn with_max_steps(max_steps: usize) -> Self {
        Self::new(CursorConfig { max_steps })
    }

    /// Number of instructions emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Extract the next atomic instruction from `plan_text`
    pub fn next(&mut self, plan_text: &str) -> EngineResult<CursorOutcome> {
        if self.last_input.as_deref() == Some(plan_text) {
            return Err(EngineError::LoopStall {
                remaining_len: plan_text.chars().count(),
            });
        }
        self.last_input = Some(plan_text.to_string());

        let body = strip_expected_section(plan_text);
        let mut skipped = Vec::new();
        let mut rest: &str = &body;

        // Every pass consumes one line, so the loop is bounded by the line count.
        while !rest.is_empty() {
            let (line, tail) = split_first_line(rest);
            rest = tail;

            let instruction = match classify_line(line) {
                LineClass::Instruction(text) => text,
                LineClass::Skip(SkipReason::Blank | SkipReason::Separator) => continue,
                LineClass::Skip(reason) => {
                    debug!(line = line.trim(), ?reason, "skipping non-actionable plan line");
                    skipped.push(SkippedLine {
                        text: line.trim().to_string(),
                        assertion: reason == SkipReason::Assertion,
                    });
                    continue;
                }
            };

            if self.emitted >= self.config.max_steps {
                return Err(EngineError::StepBudgetExceeded {
                    limit: self.config.max_steps,
                });
            }

            let (head, more) = split_compound(&instruction);
            let remaining_text = match more {
                Some(more) if rest.is_empty() => more,
                Some(more) => format!("{}\n{}", more, rest),
                None => rest.to_string(),
            };

            self.emitted += 1;
            return Ok(CursorOutcome::Step(NextInstruction {
                instruction: head,
                remaining_text,
                order: self.emitted,
                skipped,
            }));
        }

        Ok(CursorOutcome::Exhausted { skipped })
    }
}

/// Split off the first line, tolerating CRLF
fn split_first_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(i) => (text[..i].trim_end_matches('\r'), &text[i + 1..]),
        None => (text.trim_end_matches('\r'), ""),
    }
}

/// Dry run: every instruction the plan yields, plus the lines skipped along the way
pub fn preview(plan_text: &str, max_steps: usize) -> EngineResult<(Vec<String>, Vec<SkippedLine>)> {
    let mut cursor = PlanCursor::with_max_steps(max_steps);
    let mut text = plan_text.to_string();
    let mut steps = Vec::new();
    let mut skipped = Vec::new();
    loop {
        match cursor.next(&text)? {
            CursorOutcome::Step(next) => {
                skipped.extend(next.skipped);
                steps.push(next.instruction);
                text = next.remaining_text;
            }
            CursorOutcome::Exhausted { skipped: tail } => {
                skipped.extend(tail);
                return Ok((steps, skipped));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOGIN_PLAN: &str = "1. Navigate to https://x.test/login\n2. 输入用户名 admin\n3. 点击登录按钮\n预期结果:\n- 登录成功跳转到首页";

    fn expect_step(outcome: CursorOutcome) -> NextInstruction {
        match outcome {
            CursorOutcome::Step(next) => next,
            CursorOutcome::Exhausted { .. } => panic!("expected a step, plan was exhausted"),
        }
    }

    #[test]
    fn test_walks_login_plan() {
        let (steps, skipped) = preview(LOGIN_PLAN, 50).unwrap();
        assert_eq!(
            steps,
            vec!["Navigate to https://x.test/login", "输入用户名 admin", "点击登录按钮"]
        );
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_remaining_text_shrinks() {
        let mut cursor = PlanCursor::with_max_steps(50);
        let mut text = LOGIN_PLAN.to_string();
        let mut last_len = usize::MAX;
        while let CursorOutcome::Step(next) = cursor.next(&text).unwrap() {
            assert!(next.remaining_text.len() < last_len.min(text.len()));
            last_len = next.remaining_text.len();
            text = next.remaining_text;
        }
        assert_eq!(cursor.emitted(), 3);
    }

    #[test]
    fn test_assertion_lines_are_skipped() {
        let mut cursor = PlanCursor::with_max_steps(50);
        let next = expect_step(cursor.next("1. 验证页面显示欢迎语\n2. verify the welcome banner is shown\n3. 点击退出").unwrap());
        assert_eq!(next.instruction, "点击退出");
        assert_eq!(next.order, 1);
        assert_eq!(next.skipped.len(), 2);
        assert!(next.skipped.iter().all(|s| s.assertion));
    }

    #[test]
    fn test_expectation_line_mid_plan_keeps_later_steps() {
        let (steps, skipped) = preview("点击登录\n期望页面跳转到首页\n点击退出", 50).unwrap();
        assert_eq!(steps, vec!["点击登录", "点击退出"]);
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].assertion);
    }

    #[test]
    fn test_only_assertions_is_exhausted() {
        let mut cursor = PlanCursor::with_max_steps(50);
        let outcome = cursor.next("验证页面显示欢迎语\n\n---").unwrap();
        assert!(matches!(outcome, CursorOutcome::Exhausted { ref skipped } if skipped.len() == 1));
    }

    #[test]
    fn test_identical_input_is_a_stall() {
        let mut cursor = PlanCursor::with_max_steps(50);
        let first = expect_step(cursor.next("点击A\n点击B").unwrap());
        assert_eq!(first.remaining_text, "点击B");
        let err = cursor.next("点击A\n点击B").unwrap_err();
        assert!(matches!(err, EngineError::LoopStall { .. }));
    }

    #[test]
    fn test_echoing_plan_hits_step_budget() {
        let mut cursor = PlanCursor::with_max_steps(5);
        let mut text = "click A\nclick B".to_string();
        let err = loop {
            match cursor.next(&text) {
                Ok(CursorOutcome::Step(next)) => {
                    // echo the consumed instruction back so the plan never shrinks
                    text = format!("{}\n{}", next.remaining_text, next.instruction);
                }
                Ok(CursorOutcome::Exhausted { .. }) => panic!("echoing plan cannot be exhausted"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, EngineError::StepBudgetExceeded { limit: 5 }));
        assert_eq!(cursor.emitted(), 5);
    }

    #[test]
    fn test_compound_instruction_is_split() {
        let mut cursor = PlanCursor::with_max_steps(50);
        let next = expect_step(cursor.next("输入密码 123456，然后点击登录\n退出").unwrap());
        assert_eq!(next.instruction, "输入密码 123456");
        assert_eq!(next.remaining_text, "点击登录\n退出");
    }

    #[test]
    fn test_plan_with_exactly_budget_steps_completes() {
        let (steps, _) = preview("a1\na2\na3", 3).unwrap();
        assert_eq!(steps.len(), 3);
    }
}
