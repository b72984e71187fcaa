//! Parsing of backend snapshot text into [`Snapshot`] values.
//!
//! The automation driver reports the page as an indented accessibility tree:
//!
//! ```text
//! - Page URL: https://x.test/login
//! - Page Title: Login
//! - generic [ref=e2]:
//!   - textbox "用户名" [ref=e12]
//!     - /placeholder: 请输入用户名
//!   - button "登录" [ref=e13] [cursor=pointer]
//!   - link "首页" [ref=e5]:
//!     - /url: /home
//! ```
//!
//! JSON (a serialized `Snapshot` or a bare element array) is accepted too.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use super::types::{ElementRole, Snapshot, SnapshotElement};
use crate::error::{EngineError, EngineResult};

static ELEMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*-\s+([A-Za-z][\w-]*)(?:\s+"((?:[^"\\]|\\.)*)")?((?:\s*\[[^\]]*\])*)\s*(?::\s*(.*))?$"#)
        .expect("element line pattern")
});

static PROPERTY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-\s+/(\w+):\s*(.*)$").expect("property line pattern"));

static REF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[ref=([^\]\s]+)\]").expect("ref attribute pattern"));

static PAGE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-?\s*Page URL:\s*(\S+)").expect("page url pattern"));

static PAGE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-?\s*Page Title:\s*(.*)$").expect("page title pattern"));

/// Parse a raw snapshot as emitted by the automation driver
pub fn parse_snapshot(raw: &str) -> EngineResult<Snapshot> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') {
        let mut snapshot: Snapshot = serde_json::from_str(trimmed)?;
        snapshot.elements.retain(|e| !e.ref_id.is_empty());
        return Ok(snapshot);
    }
    if trimmed.starts_with('[') {
        let elements: Vec<SnapshotElement> = serde_json::from_str(trimmed)?;
        return Ok(Snapshot::new(elements));
    }
    Ok(parse_aria_text(raw))
}

/// Parse the indented accessibility-tree text format
pub fn parse_aria_text(raw: &str) -> Snapshot {
    let mut elements: Vec<SnapshotElement> = Vec::new();
    let mut seen = HashSet::new();
    let mut page_url = None;
    let mut page_title = None;
    // Properties attach to the most recent element, whether or not it was kept.
    let mut last_kept = false;

    for line in raw.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with("```") {
            continue;
        }
        if let Some(caps) = PAGE_URL.captures(line) {
            page_url = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = PAGE_TITLE.captures(line) {
            let title = caps[1].trim();
            if !title.is_empty() {
                page_title = Some(title.to_string());
            }
            continue;
        }
        if let Some(caps) = PROPERTY_LINE.captures(line) {
            if !last_kept {
                continue;
            }
            if let Some(el) = elements.last_mut() {
                let value = caps[2].trim().trim_matches('"').to_string();
                match &caps[1] {
                    "placeholder" => el.placeholder = Some(value),
                    "url" => el.url = Some(value),
                    "value" => el.value = Some(value),
                    _ => {}
                }
            }
            continue;
        }
        let Some(caps) = ELEMENT_LINE.captures(line) else {
            continue;
        };
        let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let Some(ref_id) = REF_ATTR.captures(attrs).map(|c| c[1].to_string()) else {
            last_kept = false;
            continue;
        };
        if !seen.insert(ref_id.clone()) {
            last_kept = false;
            continue;
        }

        let role = ElementRole::from_backend(&caps[1]);
        let name = caps.get(2).map(|m| unescape(m.as_str())).unwrap_or_default();
        let trailing = caps
            .get(4)
            .map(|m| m.as_str().trim().trim_matches('"').to_string())
            .filter(|s| !s.is_empty());

        let mut element = SnapshotElement::new(ref_id, role, name.clone());
        match (role, trailing) {
            (ElementRole::Textbox | ElementRole::Combobox, Some(value)) => element.value = Some(value),
            (_, Some(text)) if name.is_empty() => element.text = text,
            _ => {}
        }
        elements.push(element);
        last_kept = true;
    }

    Snapshot::new(elements).with_page(page_url, page_title)
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// Reject an empty capture where a page is expected
pub fn require_elements(snapshot: &Snapshot) -> EngineResult<()> {
    if snapshot.is_empty() {
        return Err(EngineError::TargetNotFound(
            "snapshot contains no addressable elements".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOGIN_PAGE: &str = r#"- Page URL: https://x.test/login
- Page Title: 登录
- Page Snapshot:
```yaml
- generic [ref=e2]:
  - heading "欢迎登录" [level=1] [ref=e3]
  - textbox "用户名" [ref=e12]:
    - /placeholder: 请输入用户名
  - textbox "密码" [ref=e14]
  - button "登录" [ref=e13] [cursor=pointer]
  - link "忘记密码" [ref=e15]:
    - /url: /forgot
  - text: 没有账号？
```"#;

    #[test]
    fn test_parse_login_page() {
        let snapshot = parse_aria_text(LOGIN_PAGE);
        assert_eq!(snapshot.page_url.as_deref(), Some("https://x.test/login"));
        assert_eq!(snapshot.page_title.as_deref(), Some("登录"));

        let refs: Vec<&str> = snapshot.elements.iter().map(|e| e.ref_id.as_str()).collect();
        assert_eq!(refs, vec!["e2", "e3", "e12", "e14", "e13", "e15"]);

        let username = snapshot.find("e12").unwrap();
        assert_eq!(username.role, ElementRole::Textbox);
        assert_eq!(username.text, "用户名");
        assert_eq!(username.placeholder.as_deref(), Some("请输入用户名"));

        let link = snapshot.find("e15").unwrap();
        assert_eq!(link.role, ElementRole::Link);
        assert_eq!(link.url.as_deref(), Some("/forgot"));
    }

    #[test]
    fn test_textbox_trailing_text_is_value() {
        let snapshot = parse_aria_text(r#"- textbox "Email" [ref=e5]: someone@x.test"#);
        let el = snapshot.find("e5").unwrap();
        assert_eq!(el.text, "Email");
        assert_eq!(el.value.as_deref(), Some("someone@x.test"));
    }

    #[test]
    fn test_unnamed_element_uses_trailing_text() {
        let snapshot = parse_aria_text(r#"- listitem [ref=e9]: 北京"#);
        assert_eq!(snapshot.find("e9").unwrap().text, "北京");
    }

    #[test]
    fn test_duplicate_refs_keep_first() {
        let snapshot = parse_aria_text("- button \"A\" [ref=e1]\n- button \"B\" [ref=e1]");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.elements[0].text, "A");
    }

    #[test]
    fn test_parse_json_element_array() {
        let raw = r#"[{"ref":"e1","role":"button","text":"Save"}]"#;
        let snapshot = parse_snapshot(raw).unwrap();
        assert_eq!(snapshot.find("e1").unwrap().role, ElementRole::Button);
    }

    #[test]
    fn test_require_elements() {
        assert!(require_elements(&parse_aria_text("")).is_err());
        assert!(require_elements(&parse_aria_text(LOGIN_PAGE)).is_ok());
    }
}
