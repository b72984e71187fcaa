//! Resolved commands: one variant per action kind, each with its own
//! required fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::snapshot::Snapshot;

/// Action kinds the engine can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    NavigateBack,
    Click,
    Type,
    SelectOption,
    Hover,
    PressKey,
    Wait,
    TabSwitch,
}

impl ActionKind {
    /// Parse an action name as produced by the semantic backend
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "navigate" | "goto" | "go_to" | "open_url" | "open" | "visit" => ActionKind::Navigate,
            "navigate_back" | "back" | "go_back" => ActionKind::NavigateBack,
            "click" | "tap" | "double_click" => ActionKind::Click,
            "type" | "fill" | "input" | "enter_text" => ActionKind::Type,
            "select_option" | "select" | "choose" => ActionKind::SelectOption,
            "hover" => ActionKind::Hover,
            "press_key" | "press" | "key" => ActionKind::PressKey,
            "wait" | "wait_for" | "sleep" => ActionKind::Wait,
            "tab_switch" | "switch_tab" | "tab_select" | "tab" => ActionKind::TabSwitch,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::NavigateBack => "navigate_back",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::SelectOption => "select_option",
            ActionKind::Hover => "hover",
            ActionKind::PressKey => "press_key",
            ActionKind::Wait => "wait",
            ActionKind::TabSwitch => "tab_switch",
        }
    }

    /// A failure of a critical action always aborts the run
    pub fn is_critical(self) -> bool {
        matches!(self, ActionKind::Navigate)
    }

    /// Whether the action acts on a page element
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Type | ActionKind::SelectOption | ActionKind::Hover
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The element a command acts on: a snapshot ref, a description, or both
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Target {
    pub fn by_ref(ref_id: impl Into<String>, description: Option<String>) -> Self {
        Self {
            ref_id: Some(ref_id.into()),
            description,
        }
    }

    pub fn described(description: impl Into<String>) -> Self {
        Self {
            ref_id: None,
            description: Some(description.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ref_id.as_deref().is_none_or(|r| r.trim().is_empty())
            && self.description.as_deref().is_none_or(|d| d.trim().is_empty())
    }

    /// Human-readable name: the description, else the ref
    pub fn label(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or(self.ref_id.as_deref())
            .unwrap_or("")
    }
}

/// Which browser tab to activate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum TabSelector {
    First,
    Last,
    /// 1-based tab position
    Index { index: usize },
    Title { title: String },
}

impl fmt::Display for TabSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabSelector::First => f.write_str("first tab"),
            TabSelector::Last => f.write_str("last tab"),
            TabSelector::Index { index } => write!(f, "tab {}", index),
            TabSelector::Title { title } => write!(f, "tab \"{}\"", title),
        }
    }
}

/// A validated, typed action ready for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedCommand {
    Navigate {
        url: String,
    },
    NavigateBack,
    Click {
        target: Target,
        #[serde(default)]
        double: bool,
    },
    Type {
        target: Target,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    SelectOption {
        target: Target,
        values: Vec<String>,
    },
    Hover {
        target: Target,
    },
    PressKey {
        key: String,
    },
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    TabSwitch {
        tab: TabSelector,
    },
}

impl ResolvedCommand {
    pub fn kind(&self) -> ActionKind {
        match self {
            ResolvedCommand::Navigate { .. } => ActionKind::Navigate,
            ResolvedCommand::NavigateBack => ActionKind::NavigateBack,
            ResolvedCommand::Click { .. } => ActionKind::Click,
            ResolvedCommand::Type { .. } => ActionKind::Type,
            ResolvedCommand::SelectOption { .. } => ActionKind::SelectOption,
            ResolvedCommand::Hover { .. } => ActionKind::Hover,
            ResolvedCommand::PressKey { .. } => ActionKind::PressKey,
            ResolvedCommand::Wait { .. } => ActionKind::Wait,
            ResolvedCommand::TabSwitch { .. } => ActionKind::TabSwitch,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            ResolvedCommand::Click { target, .. }
            | ResolvedCommand::Type { target, .. }
            | ResolvedCommand::SelectOption { target, .. }
            | ResolvedCommand::Hover { target } => Some(target),
            _ => None,
        }
    }

    pub fn target_ref(&self) -> Option<&str> {
        self.target().and_then(|t| t.ref_id.as_deref())
    }

    /// Explicit wait duration, if any
    pub fn wait_duration(&self) -> Option<Duration> {
        match self {
            ResolvedCommand::Wait {
                duration_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Check required fields, and that any ref exists in the snapshot it was grounded on
    pub fn validate(&self, snapshot: Option<&Snapshot>) -> EngineResult<()> {
        if let Some(target) = self.target() {
            if target.is_empty() {
                return Err(invalid(format!("{} requires a target ref or description", self.kind())));
            }
            if let Some(ref_id) = target.ref_id.as_deref() {
                match snapshot {
                    Some(snapshot) if !snapshot.contains_ref(ref_id) => {
                        return Err(invalid(format!("ref '{}' is not in the current snapshot", ref_id)));
                    }
                    None => {
                        return Err(invalid(format!("ref '{}' given without a snapshot", ref_id)));
                    }
                    _ => {}
                }
            }
        }

        match self {
            ResolvedCommand::Navigate { url } if !is_navigable_url(url) => {
                Err(invalid(format!("navigate requires a url, got '{}'", url)))
            }
            ResolvedCommand::Type { text, .. } if text.is_empty() => {
                Err(invalid("type requires text taken from the instruction"))
            }
            ResolvedCommand::SelectOption { values, .. } if values.iter().all(|v| v.trim().is_empty()) => {
                Err(invalid("select_option requires at least one value"))
            }
            ResolvedCommand::PressKey { key } if key.trim().is_empty() => {
                Err(invalid("press_key requires a key"))
            }
            ResolvedCommand::Wait {
                duration_ms: None,
                text: None,
            } => Err(invalid("wait requires a duration or text to wait for")),
            ResolvedCommand::TabSwitch {
                tab: TabSelector::Index { index: 0 },
            } => Err(invalid("tab index is 1-based")),
            _ => Ok(()),
        }
    }

    /// Short description for logs and step records
    pub fn describe(&self) -> String {
        let with_ref = |target: &Target| match target.ref_id.as_deref() {
            Some(r) => format!("{} [{}]", target.label(), r),
            None => target.label().to_string(),
        };
        match self {
            ResolvedCommand::Navigate { url } => format!("navigate {}", url),
            ResolvedCommand::NavigateBack => "navigate back".to_string(),
            ResolvedCommand::Click { target, double } => {
                format!("{} {}", if *double { "double-click" } else { "click" }, with_ref(target))
            }
            ResolvedCommand::Type { target, text, .. } => format!("type \"{}\" into {}", text, with_ref(target)),
            ResolvedCommand::SelectOption { target, values } => {
                format!("select {} in {}", values.join(", "), with_ref(target))
            }
            ResolvedCommand::Hover { target } => format!("hover {}", with_ref(target)),
            ResolvedCommand::PressKey { key } => format!("press {}", key),
            ResolvedCommand::Wait { duration_ms, text } => match (duration_ms, text) {
                (Some(ms), _) => format!("wait {}ms", ms),
                (None, Some(text)) => format!("wait for \"{}\"", text),
                (None, None) => "wait".to_string(),
            },
            ResolvedCommand::TabSwitch { tab } => format!("switch to {}", tab),
        }
    }

    /// Past-tense phrase recorded in the execution trace ("clicked 登录")
    pub fn trace_phrase(&self) -> String {
        match self {
            ResolvedCommand::Navigate { url } => format!("navigated to {}", url),
            ResolvedCommand::NavigateBack => "navigated back".to_string(),
            ResolvedCommand::Click { target, .. } => format!("clicked {}", target.label()),
            ResolvedCommand::Type { target, text, .. } => format!("typed {} into {}", text, target.label()),
            ResolvedCommand::SelectOption { target, values } => {
                format!("selected {} in {}", values.join(", "), target.label())
            }
            ResolvedCommand::Hover { target } => format!("hovered over {}", target.label()),
            ResolvedCommand::PressKey { key } => format!("pressed {}", key),
            ResolvedCommand::Wait { duration_ms, text } => match (duration_ms, text) {
                (Some(ms), _) => format!("waited {}ms", ms),
                (None, Some(text)) => format!("waited for {}", text),
                (None, None) => "waited".to_string(),
            },
            ResolvedCommand::TabSwitch { tab } => format!("switched to {}", tab),
        }
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::ActionValidation(message.into())
}

/// Absolute http(s)/file/about URLs and site-relative paths
pub fn is_navigable_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return false;
    }
    ["http://", "https://", "file://", "about:"]
        .iter()
        .any(|scheme| url.to_ascii_lowercase().starts_with(scheme))
        || url.starts_with('/')
}

/// Add a scheme to bare hosts ("x.test/login" → "https://x.test/login")
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches(['。', '，', ',', ')', '）', '"', '”', '\'']);
    if is_navigable_url(url) {
        return url.to_string();
    }
    let looks_like_host = url
        .split('/')
        .next()
        .is_some_and(|host| host.contains('.') && !host.contains(char::is_whitespace));
    if looks_like_host {
        format!("https://{}", url)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ElementRole, SnapshotElement};
    use pretty_assertions::assert_eq;

    fn snapshot() -> Snapshot {
        Snapshot::new(vec![SnapshotElement::new("e13", ElementRole::Button, "登录")])
    }

    #[test]
    fn test_serializes_as_tagged_variant() {
        let cmd = ResolvedCommand::Click {
            target: Target::by_ref("e13", Some("登录".into())),
            double: false,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "click");
        assert_eq!(json["target"]["ref"], "e13");

        let back: ResolvedCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_fabricated_ref_is_rejected() {
        let cmd = ResolvedCommand::Click {
            target: Target::by_ref("e99", None),
            double: false,
        };
        let err = cmd.validate(Some(&snapshot())).unwrap_err();
        assert!(matches!(err, EngineError::ActionValidation(_)));
        assert!(cmd.validate(None).is_err());
    }

    #[test]
    fn test_target_required() {
        let cmd = ResolvedCommand::Hover { target: Target::default() };
        assert!(cmd.validate(Some(&snapshot())).is_err());

        let cmd = ResolvedCommand::Hover {
            target: Target::described("the avatar"),
        };
        assert!(cmd.validate(None).is_ok());
    }

    #[test]
    fn test_navigate_requires_url() {
        let bad = ResolvedCommand::Navigate { url: "the login page".into() };
        assert!(bad.validate(None).is_err());
        let good = ResolvedCommand::Navigate {
            url: "https://x.test/login".into(),
        };
        assert!(good.validate(None).is_ok());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("x.test/login"), "https://x.test/login");
        assert_eq!(normalize_url("https://x.test。"), "https://x.test");
        assert_eq!(normalize_url("/settings"), "/settings");
        assert_eq!(normalize_url("首页"), "首页");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(ActionKind::from_name("fill"), Some(ActionKind::Type));
        assert_eq!(ActionKind::from_name("Select Option"), Some(ActionKind::SelectOption));
        assert_eq!(ActionKind::from_name("switch-tab"), Some(ActionKind::TabSwitch));
        assert_eq!(ActionKind::from_name("assert"), None);
        assert!(ActionKind::Navigate.is_critical());
        assert!(!ActionKind::Click.is_critical());
    }

    #[test]
    fn test_trace_phrase() {
        let cmd = ResolvedCommand::Type {
            target: Target::by_ref("e12", Some("用户名".into())),
            text: "admin".into(),
            submit: false,
        };
        assert_eq!(cmd.trace_phrase(), "typed admin into 用户名");
        assert_eq!(cmd.describe(), "type \"admin\" into 用户名 [e12]");
    }
}
