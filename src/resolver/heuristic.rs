//! Rule-based resolution used when the semantic backend is unavailable,
//! times out, or returns something unusable.
//!
//! The heuristic never invents a ref: targets carry the raw instruction as
//! their description and the automation backend locates the element itself.

use once_cell::sync::Lazy;
use regex::Regex;

use super::command::{ResolvedCommand, Target};
use super::fast_path::{find_url, parse_number};
use crate::text::is_han;

static NAVIGATE_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:navigate|go\s+to|goto|open|visit|browse\s+to|load|访问|打开|进入|导航|跳转到|前往)")
        .expect("navigate words")
});

static WAIT_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:wait|sleep|pause|等待|等到|暂停)").expect("wait words"));

static WAIT_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9]+|[一二三四五六七八九十]+)\s*(ms|milliseconds?|s\b|secs?\b|seconds?|毫秒|秒)")
        .expect("wait duration")
});

static WAIT_FOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:wait|等待|等到)\s*(?:for|until|直到)?\s*(.+?)\s*(?:to\s+appear|appears?|出现|加载完成|显示)?\s*[.。]?$")
        .expect("wait for")
});

static TYPE_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:输入|填写|填入|键入|录入|^type\b|^enter\b|^fill\b|^input\b)").expect("type words")
});

static HOVER_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^hover|^mouse\s+over|悬停|鼠标移到|鼠标移动到|移动到.*上方)").expect("hover words")
});

static PRESS_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:press|hit|按下?|敲击?)\s*(?:the\s+)?(enter|return|tab|escape|esc|space|backspace|delete|arrowup|arrowdown|arrowleft|arrowright|pageup|pagedown|home|end|f[0-9]{1,2}|回车|空格|退格|删除)(?:\s*(?:key|键))?\s*[.。]?$")
        .expect("press key")
});

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”|'([^']+)'|「([^」]+)」|‘([^’]+)’"#).expect("quoted"));

static ZH_TYPE_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:输入|填写|填入|键入|录入)").expect("zh type verb"));

static EN_TYPE_INTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:type|enter|input)\s+(.+?)\s+(?:into|in|to)\s+(?:the\s+)?\S").expect("type into")
});

static EN_FILL_WITH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^fill\s+(?:in\s+|out\s+)?(?:the\s+)?.+?\s+with\s+(.+)$").expect("fill with")
});

static EN_ENTER_AS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:type|enter|input)\s+(.+?)\s+as\s+(?:the\s+)?\S").expect("enter as"));

static EN_TYPE_REST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:type|enter|input|fill\s+in)\s+(.+)$").expect("type rest")
});

/// Resolve an instruction by keyword family
pub fn resolve_heuristic(instruction: &str) -> ResolvedCommand {
    let text = instruction.trim();
    let described = || Target::described(text);

    if NAVIGATE_WORDS.is_match(text) {
        if let Some(url) = find_url(text) {
            return ResolvedCommand::Navigate { url };
        }
    }

    if WAIT_WORDS.is_match(text) {
        if let Some(ms) = wait_millis(text) {
            return ResolvedCommand::Wait {
                duration_ms: Some(ms),
                text: None,
            };
        }
        if let Some(caps) = WAIT_FOR.captures(text) {
            let awaited = caps[1].trim();
            if !awaited.is_empty() {
                return ResolvedCommand::Wait {
                    duration_ms: None,
                    text: Some(strip_quotes(awaited)),
                };
            }
        }
    }

    if let Some(caps) = PRESS_KEY.captures(text) {
        return ResolvedCommand::PressKey {
            key: key_name(&caps[1]),
        };
    }

    if TYPE_WORDS.is_match(text) {
        if let Some(payload) = extract_input_text(text) {
            return ResolvedCommand::Type {
                target: described(),
                text: payload,
                submit: false,
            };
        }
    }

    if HOVER_WORDS.is_match(text) {
        return ResolvedCommand::Hover { target: described() };
    }

    ResolvedCommand::Click {
        target: described(),
        double: is_double_click(text),
    }
}

fn is_double_click(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("double") || lower.contains("双击")
}

fn wait_millis(text: &str) -> Option<u64> {
    let caps = WAIT_DURATION.captures(text)?;
    let amount = parse_number(&caps[1])?;
    let unit = caps[2].to_ascii_lowercase();
    if unit.starts_with("ms") || unit.starts_with("milli") || unit == "毫秒" {
        Some(amount)
    } else {
        Some(amount.saturating_mul(1000))
    }
}

fn key_name(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "enter" | "return" | "回车" => "Enter".to_string(),
        "tab" => "Tab".to_string(),
        "escape" | "esc" => "Escape".to_string(),
        "space" | "空格" => "Space".to_string(),
        "backspace" | "退格" => "Backspace".to_string(),
        "delete" | "删除" => "Delete".to_string(),
        "arrowup" => "ArrowUp".to_string(),
        "arrowdown" => "ArrowDown".to_string(),
        "arrowleft" => "ArrowLeft".to_string(),
        "arrowright" => "ArrowRight".to_string(),
        "pageup" => "PageUp".to_string(),
        "pagedown" => "PageDown".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        other => other.to_uppercase(),
    }
}

/// The literal text an input instruction asks to type.
///
/// Only the instruction is consulted: the value after the last input verb,
/// a quoted span, or the English `type X into`, `fill ... with X` and
/// `enter X as` forms. Placeholder or label text from the page is never a
/// source.
pub fn extract_input_text(instruction: &str) -> Option<String> {
    let text = instruction.trim();

    if let Some(quoted) = quoted_after_verb(text) {
        return Some(quoted);
    }

    if let Some(value) = zh_value_after_verb(text) {
        return Some(value);
    }

    for pattern in [&*EN_TYPE_INTO, &*EN_FILL_WITH, &*EN_ENTER_AS, &*EN_TYPE_REST] {
        if let Some(caps) = pattern.captures(text) {
            let value = clean_value(&caps[1]);
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// A quoted span following the last input verb, else the last quoted span
fn quoted_after_verb(text: &str) -> Option<String> {
    let verb_end = TYPE_WORDS.find_iter(text).last().map(|m| m.end()).unwrap_or(0);
    let spans: Vec<(usize, String)> = QUOTED
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = (1..=5).find_map(|i| caps.get(i))?;
            Some((whole.start(), inner.as_str().to_string()))
        })
        .collect();
    spans
        .iter()
        .find(|(start, _)| *start >= verb_end)
        .or(spans.last())
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty())
}

/// Chinese form: take what follows the last input verb not naming a field
/// ("输入框"/"输入栏"), then drop a leading field name.
fn zh_value_after_verb(text: &str) -> Option<String> {
    let verb = ZH_TYPE_VERB
        .find_iter(text)
        .filter(|m| !text[m.end()..].starts_with(['框', '栏']))
        .last()?;
    let mut rest = text[verb.end()..].trim_start();

    // "输入用户名：admin" / "输入用户名为admin"
    if let Some(i) = rest.find([':', '：']) {
        rest = &rest[i + rest[i..].chars().next().map_or(1, char::len_utf8)..];
    } else if let Some(pos) = first_han_separator(rest) {
        rest = &rest[pos..];
    } else if let Some(pos) = han_field_then_value(rest) {
        rest = &rest[pos..];
    }

    let value = clean_value(rest);
    (!value.is_empty()).then_some(value)
}

/// Byte offset just past a 为/是 that separates a Han field name from its value
fn first_han_separator(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices().peekable();
    let mut seen_field = false;
    while let Some((i, c)) = chars.next() {
        if (c == '为' || c == '是') && seen_field {
            let next = chars.peek().map(|(j, _)| *j).unwrap_or(rest.len());
            if next < rest.len() {
                return Some(next);
            }
            return None;
        }
        if is_han(c) {
            seen_field = true;
        } else {
            return None;
        }
    }
    None
}

/// "用户名 admin": a Han field name, whitespace, then the value
fn han_field_then_value(rest: &str) -> Option<usize> {
    let field_end = rest.char_indices().find(|(_, c)| !is_han(*c)).map(|(i, _)| i)?;
    if field_end == 0 {
        return None;
    }
    let after = &rest[field_end..];
    if !after.starts_with(char::is_whitespace) {
        return None;
    }
    let value_start = field_end + (after.len() - after.trim_start().len());
    (value_start < rest.len()).then_some(value_start)
}

fn clean_value(raw: &str) -> String {
    let value = raw.trim().trim_end_matches(['。', '，', ',', '；', ';']);
    strip_quotes(value.trim())
}

fn strip_quotes(s: &str) -> String {
    let pairs = [('"', '"'), ('“', '”'), ('\'', '\''), ('「', '」'), ('‘', '’')];
    for (open, close) in pairs {
        if s.len() >= 2 && s.starts_with(open) && s.ends_with(close) {
            return s[open.len_utf8()..s.len() - close.len_utf8()].to_string();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_input_text_is_literal() {
        assert_eq!(extract_input_text("在用户名输入框输入 admin").as_deref(), Some("admin"));
        assert_eq!(extract_input_text("输入用户名 admin").as_deref(), Some("admin"));
        assert_eq!(extract_input_text("输入密码 123456").as_deref(), Some("123456"));
        assert_eq!(extract_input_text("输入用户名为admin").as_deref(), Some("admin"));
        assert_eq!(extract_input_text("输入用户名：admin").as_deref(), Some("admin"));
        assert_eq!(extract_input_text("在搜索框中输入手机").as_deref(), Some("手机"));
        assert_eq!(extract_input_text("在\"邮箱\"输入框输入\"a@b.test\"").as_deref(), Some("a@b.test"));
    }

    #[test]
    fn test_english_input_forms() {
        assert_eq!(extract_input_text("type admin into the username field").as_deref(), Some("admin"));
        assert_eq!(extract_input_text("Fill the email field with a@b.test").as_deref(), Some("a@b.test"));
        assert_eq!(extract_input_text("enter bob as the username").as_deref(), Some("bob"));
        assert_eq!(extract_input_text("type \"hello world\" in search").as_deref(), Some("hello world"));
        assert_eq!(extract_input_text("click the login button"), None);
    }

    #[test]
    fn test_keyword_families() {
        assert_eq!(
            resolve_heuristic("打开 https://x.test"),
            ResolvedCommand::Navigate {
                url: "https://x.test".into()
            }
        );
        assert!(matches!(
            resolve_heuristic("等待 3 秒"),
            ResolvedCommand::Wait {
                duration_ms: Some(3000),
                ..
            }
        ));
        assert_eq!(
            resolve_heuristic("wait for the dialog to appear"),
            ResolvedCommand::Wait {
                duration_ms: None,
                text: Some("the dialog".into())
            }
        );
        assert_eq!(
            resolve_heuristic("press Enter"),
            ResolvedCommand::PressKey { key: "Enter".into() }
        );
        assert!(matches!(resolve_heuristic("鼠标悬停在头像上"), ResolvedCommand::Hover { .. }));
    }

    #[test]
    fn test_huge_wait_saturates() {
        assert_eq!(
            resolve_heuristic("wait about 18446744073709552 seconds"),
            ResolvedCommand::Wait {
                duration_ms: Some(u64::MAX),
                text: None
            }
        );
    }

    #[test]
    fn test_type_targets_raw_instruction() {
        let cmd = resolve_heuristic("输入用户名 admin");
        assert_eq!(
            cmd,
            ResolvedCommand::Type {
                target: Target::described("输入用户名 admin"),
                text: "admin".into(),
                submit: false,
            }
        );
        assert!(cmd.target_ref().is_none());
    }

    #[test]
    fn test_default_is_click_without_ref() {
        let cmd = resolve_heuristic("点击登录按钮");
        assert_eq!(
            cmd,
            ResolvedCommand::Click {
                target: Target::described("点击登录按钮"),
                double: false,
            }
        );
        assert!(matches!(resolve_heuristic("双击文件名"), ResolvedCommand::Click { double: true, .. }));
        // "press" on a button is a click, not a key press
        assert!(matches!(resolve_heuristic("press the Login button"), ResolvedCommand::Click { .. }));
    }
}
