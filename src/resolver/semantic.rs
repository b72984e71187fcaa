//! Prompt and output contract for semantic resolution.
//!
//! The backend must answer with one `<command>{...}</command>` block. Its
//! output is untrusted: every field is checked against the instruction and
//! the snapshot before a [`ResolvedCommand`] is built.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::command::{ActionKind, ResolvedCommand, TabSelector, Target, is_navigable_url, normalize_url};
use super::fast_path::match_tab_switch;
use super::heuristic::extract_input_text;
use super::ranking::{self, Ranked};
use crate::error::{EngineError, EngineResult};
use crate::snapshot::{Candidate, Snapshot, render_candidates};

pub const SYSTEM_PROMPT: &str = "You map one UI test instruction onto one browser action.

Reply with exactly one block:
<command>{\"action\": \"...\", \"targetRef\": \"...\", \"description\": \"...\", \"payloadText\": \"...\"}</command>

Actions: navigate(url), navigate_back, click(targetRef), type(targetRef, payloadText), select_option(targetRef, values), hover(targetRef), press_key(key), wait(durationMs or payloadText), tab_switch(tab).

Rules:
1. targetRef MUST be one of the refs in the candidate list. Never invent a ref.
2. payloadText MUST be copied verbatim from the instruction. Never use a candidate's text, label or placeholder as the payload.
3. \"select\"/\"choose\"/\"选择\" picks a listitem candidate. \"open\"/\"expand\"/\"展开\" without a selection verb targets the textbox or combobox that opens the dropdown.
4. Menu clicks prefer button or link candidates whose text contains the named item: exact match first, then contains, then partial. Respect position words such as \"bottom\" or \"底部\".
5. navigate requires a url. Actions on elements require a targetRef or a description.";

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think block pattern"));

static COMMAND_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<command>\s*(.*?)\s*</command>").expect("command block pattern"));

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block pattern"));

/// Build the user prompt: instruction, page, and ranked candidates
pub fn build_user_prompt(instruction: &str, snapshot: &Snapshot, ranked: &[Ranked]) -> String {
    let candidates: Vec<Candidate> = ranked.iter().map(|r| r.candidate.clone()).collect();
    let mut prompt = format!("Instruction: {}\n", instruction.trim());
    if let Some(url) = &snapshot.page_url {
        prompt.push_str(&format!("Page URL: {}\n", url));
    }
    if let Some(title) = &snapshot.page_title {
        prompt.push_str(&format!("Page title: {}\n", title));
    }
    prompt.push_str(&format!("\nCandidates ({}), most likely first:\n", candidates.len()));
    prompt.push_str(&render_candidates(&candidates));
    prompt.push('\n');
    prompt
}

/// Raw command fields as produced by the backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDraft {
    #[serde(alias = "type", alias = "command")]
    pub action: String,

    #[serde(default, alias = "target_ref", alias = "ref")]
    pub target_ref: Option<String>,

    #[serde(default, alias = "target")]
    pub description: Option<String>,

    #[serde(default, alias = "payload_text", alias = "text", alias = "value")]
    pub payload_text: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default, alias = "options")]
    pub values: Option<Vec<String>>,

    #[serde(default, alias = "duration_ms")]
    pub duration_ms: Option<u64>,

    #[serde(default)]
    pub tab: Option<serde_json::Value>,

    #[serde(default)]
    pub submit: bool,

    #[serde(default, alias = "doubleClick")]
    pub double: bool,
}

/// Pull the command JSON out of a backend reply
pub fn parse_response(raw: &str) -> EngineResult<CommandDraft> {
    let cleaned = THINK_BLOCK.replace_all(raw, "");
    let body = if let Some(caps) = COMMAND_BLOCK.captures(&cleaned) {
        caps[1].to_string()
    } else if let Some(caps) = FENCED_BLOCK.captures(&cleaned) {
        caps[1].to_string()
    } else {
        match (cleaned.find('{'), cleaned.rfind('}')) {
            (Some(start), Some(end)) if start < end => cleaned[start..=end].to_string(),
            _ => return Err(invalid("no command block in response")),
        }
    };
    serde_json::from_str(&body).map_err(|e| invalid(format!("malformed command block: {}", e)))
}

/// Validate a draft against the instruction and snapshot and build the command
pub fn draft_to_command(
    draft: CommandDraft,
    instruction: &str,
    snapshot: &Snapshot,
    candidates: &[Candidate],
) -> EngineResult<ResolvedCommand> {
    let kind = ActionKind::from_name(&draft.action)
        .ok_or_else(|| invalid(format!("unknown action '{}'", draft.action)))?;

    let grounded = if kind.requires_target() {
        Some(ground_target(&draft, instruction, snapshot, candidates)?)
    } else {
        None
    };
    let target = || grounded.clone().unwrap_or_default();

    let command = match kind {
        ActionKind::Navigate => {
            let url = draft
                .url
                .as_deref()
                .or(draft.payload_text.as_deref())
                .map(normalize_url)
                .filter(|u| is_navigable_url(u))
                .ok_or_else(|| invalid("navigate without a url"))?;
            ResolvedCommand::Navigate { url }
        }
        ActionKind::NavigateBack => ResolvedCommand::NavigateBack,
        ActionKind::Click => ResolvedCommand::Click {
            target: target(),
            double: draft.double,
        },
        ActionKind::Type => {
            let text = literal_payload(&draft, instruction, snapshot)
                .ok_or_else(|| invalid("type without a payload taken from the instruction"))?;
            ResolvedCommand::Type {
                target: target(),
                text,
                submit: draft.submit,
            }
        }
        ActionKind::SelectOption => {
            let values = match draft.values.clone() {
                Some(values) if !values.is_empty() => values,
                _ => draft
                    .payload_text
                    .clone()
                    .or_else(|| ranking::extract_item_name(instruction))
                    .map(|v| vec![v])
                    .unwrap_or_default(),
            };
            ResolvedCommand::SelectOption {
                target: target(),
                values,
            }
        }
        ActionKind::Hover => ResolvedCommand::Hover { target: target() },
        ActionKind::PressKey => ResolvedCommand::PressKey {
            key: draft
                .key
                .clone()
                .or(draft.payload_text.clone())
                .ok_or_else(|| invalid("press_key without a key"))?,
        },
        ActionKind::Wait => ResolvedCommand::Wait {
            duration_ms: draft.duration_ms,
            text: if draft.duration_ms.is_none() {
                draft.payload_text.clone()
            } else {
                None
            },
        },
        ActionKind::TabSwitch => ResolvedCommand::TabSwitch {
            tab: tab_selector(draft.tab.as_ref(), instruction)?,
        },
    };

    command
        .validate(Some(snapshot))
        .map_err(|e| invalid(e.to_string()))?;
    Ok(command)
}

/// Check the chosen ref, apply role corrections, and fill the description
fn ground_target(
    draft: &CommandDraft,
    instruction: &str,
    snapshot: &Snapshot,
    candidates: &[Candidate],
) -> EngineResult<Target> {
    let ref_id = draft
        .target_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| r.trim_start_matches('[').trim_end_matches(']').to_string());
    let description = draft
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let Some(ref_id) = ref_id else {
        return match description {
            Some(description) => Ok(Target::described(description)),
            None => Err(invalid("action requires a targetRef or description")),
        };
    };

    let element = snapshot
        .find(&ref_id)
        .ok_or_else(|| invalid(format!("ref '{}' is not in the snapshot", ref_id)))?;

    let chosen = candidates
        .iter()
        .find(|c| c.ref_id == ref_id)
        .cloned()
        .unwrap_or_else(|| Candidate {
            ref_id: ref_id.clone(),
            role: element.role,
            text: element.label().to_string(),
            index: 0,
        });

    if let Some(corrected) = ranking::correct_choice(instruction, &chosen, candidates) {
        debug!(
            from = %chosen.ref_id,
            to = %corrected.ref_id,
            role = %corrected.role,
            "corrected semantic target role"
        );
        return Ok(Target::by_ref(corrected.ref_id, Some(corrected.text)));
    }

    let label = element.label().trim();
    let description = if label.is_empty() { description } else { Some(label.to_string()) };
    Ok(Target::by_ref(ref_id, description))
}

/// The payload for a type action, only ever taken from the instruction.
///
/// The backend's payload is kept, spelled as in the instruction, when it
/// appears there and is not the label or placeholder of an element on the
/// page; otherwise the locally extracted value wins.
fn literal_payload(draft: &CommandDraft, instruction: &str, snapshot: &Snapshot) -> Option<String> {
    let local = extract_input_text(instruction);
    let proposed = draft.payload_text.as_deref().map(str::trim).filter(|p| !p.is_empty());

    let Some(proposed) = proposed else {
        return local;
    };
    let Some(literal) = instruction_span(instruction, proposed) else {
        debug!(proposed, local = ?local, "replacing non-literal payload");
        return local;
    };
    let echoes_page = snapshot.elements.iter().any(|e| {
        let label = e.label();
        !label.is_empty() && (label.contains(literal) || e.placeholder.as_deref().is_some_and(|p| p.contains(literal)))
    });

    if !echoes_page || local.is_none() {
        return Some(literal.to_string());
    }
    debug!(proposed, local = ?local, "replacing non-literal payload");
    local
}

/// The slice of `instruction` matching `proposed`, ignoring case
fn instruction_span<'a>(instruction: &'a str, proposed: &str) -> Option<&'a str> {
    if let Some(start) = instruction.find(proposed) {
        return Some(&instruction[start..start + proposed.len()]);
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(proposed))).ok()?;
    pattern.find(instruction).map(|m| m.as_str())
}

fn tab_selector(raw: Option<&serde_json::Value>, instruction: &str) -> EngineResult<TabSelector> {
    let from_instruction = || match match_tab_switch(instruction) {
        Some(ResolvedCommand::TabSwitch { tab }) => Ok(tab),
        _ => Err(invalid("tab_switch without a tab")),
    };
    let selector = match raw {
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(1) => TabSelector::First,
            Some(index) if index > 1 => TabSelector::Index { index: index as usize },
            _ => return Err(invalid("tab index is 1-based")),
        },
        Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "last" | "latest" | "newest" => TabSelector::Last,
            "first" => TabSelector::First,
            other => match other.parse::<usize>() {
                Ok(1) => TabSelector::First,
                Ok(index) if index > 1 => TabSelector::Index { index },
                _ => TabSelector::Title { title: s.trim().to_string() },
            },
        },
        Some(value @ serde_json::Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|e| invalid(format!("bad tab selector: {}", e)))?,
        _ => return from_instruction(),
    };
    Ok(selector)
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::ResolutionInvalid(message.into())
}
