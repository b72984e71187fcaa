//! Line classification for plan text: expected-result sections, enumeration
//! markers, headers, and the assertion/verification lexicon.

use once_cell::sync::Lazy;
use regex::Regex;

// A header is a full section keyword, alone or followed by a colon and inline
// text. Bare 预期/期望 only count when the colon follows directly.
static EXPECTED_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*(?:(?:预期结果|期望结果|预期效果|期望效果|expected\s+results?|expected\s+outcomes?|expected\s+behaviou?r|expectations?)\s*(?:\*\*)?\s*(?:[:：]\s*(?:\*\*)?\s*(.*))?|(?:预期|期望)(?:\*\*)?[:：]\s*(?:\*\*)?\s*(.*))$",
    )
    .expect("expected header pattern")
});

static STEPS_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*(?:测试步骤|操作步骤|步骤|test\s+steps|steps)\s*(?:\*\*)?\s*[:：]?\s*(?:\*\*)?\s*$")
        .expect("steps header pattern")
});

static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*(?:前置条件|前提条件|测试数据|测试目的|用例名称|用例标题|备注|说明|preconditions?|prerequisites?|test\s+data|notes?|title|description)\s*(?:\*\*)?\s*[:：]")
        .expect("label line pattern")
});

static MARKDOWN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#{1,6}\s").expect("heading pattern"));

static FENCE_OR_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:```.*|~~~.*|-{3,}|\*{3,}|_{3,}|={3,})\s*$").expect("fence pattern")
});

static BULLET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•·+]\s+|\(?[0-9]{1,3}[.)、．]\s*|[（(][0-9]{1,3}[)）]\s*)(.+)$")
        .expect("bullet pattern")
});

static ENUMERATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*•·+]\s+|\(?[0-9]{1,3}[.)、．:：]\s*|[（(][0-9]{1,3}[)）]\s*|步骤\s*[0-9一二三四五六七八九十]+\s*[:：.、]?\s*|第\s*[0-9一二三四五六七八九十]+\s*步\s*[:：.、,，]?\s*|step\s*[0-9]+\s*[:：.)-]?\s*)",
    )
    .expect("enumeration pattern")
});

static LEADING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:然后|接着|and\s+then\s+|then\s+|next[,，]?\s+|finally[,，]?\s+|最后[,，]|之后[,，])[,，:：\s]*")
        .expect("connector pattern")
});

static COMPOUND_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:[,，;；]\s*(?:然后|接着|之后再|之后|再次|再|and\s+then|then)\s*|[;；]\s*)")
        .expect("compound split pattern")
});

static ASSERTION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:verify|verifies|check|checks|confirm|confirms|assert|ensure|validate|make\s+sure|expect|observe|see\s+that)\b|验证|检查|确认|校验|核对|核实|断言|检验|判断|确保|观察|期望|预期|应该|应当)",
    )
    .expect("assertion prefix pattern")
});

static ASSERTION_ANYWHERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:应该|应当|是否|should\s+(?:be|see|show|display|contain|appear|have|redirect|navigate)|(?:is|are)\s+(?:displayed|shown|visible|present))",
    )
    .expect("assertion pattern")
});

static CHECKBOX_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:check|uncheck)\b.*\b(?:checkbox|check\s+box|box|option|toggle|radio)\b")
        .expect("checkbox action pattern")
});

/// Why a line was not turned into an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    Separator,
    Header,
    Assertion,
}

/// Result of classifying one normalized plan line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Instruction(String),
    Skip(SkipReason),
}

/// Drop the expected-results section.
///
/// The section starts at a header line (`预期结果:`, `Expected results:` ...)
/// and runs until a steps header or the end of the text. Markdown fences and
/// separators are dropped everywhere.
pub fn strip_expected_section(text: &str) -> String {
    let mut kept = Vec::new();
    let mut in_expected = false;
    for line in text.lines() {
        if FENCE_OR_SEPARATOR.is_match(line) {
            continue;
        }
        if EXPECTED_HEADER.is_match(line) {
            in_expected = true;
            continue;
        }
        if in_expected {
            if STEPS_HEADER.is_match(line) {
                in_expected = false;
            } else {
                continue;
            }
        }
        kept.push(line);
    }
    kept.join("\n")
}

/// Collect the items of every expected-results section in the text
pub fn extract_expected_results(text: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut in_expected = false;
    for line in text.lines() {
        if FENCE_OR_SEPARATOR.is_match(line) {
            continue;
        }
        if let Some(caps) = EXPECTED_HEADER.captures(line) {
            in_expected = true;
            let inline = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim())
                .unwrap_or("");
            if !inline.is_empty() {
                results.push(inline.to_string());
            }
            continue;
        }
        if !in_expected {
            continue;
        }
        if STEPS_HEADER.is_match(line) {
            in_expected = false;
            continue;
        }
        let item = match BULLET.captures(line) {
            Some(caps) => caps[1].trim().to_string(),
            None => line.trim().to_string(),
        };
        if !item.is_empty() {
            results.push(item);
        }
    }
    results
}

/// Remove leading enumeration markers and sequencing connectors
pub fn strip_enumeration(line: &str) -> String {
    let mut current = line.trim().to_string();
    // "- 1. 步骤2：" style stacks are rare but real
    for _ in 0..3 {
        let next = ENUMERATION.replace(&current, "").trim().to_string();
        if next == current {
            break;
        }
        current = next;
    }
    LEADING_CONNECTOR.replace(&current, "").trim().to_string()
}

/// Whether an instruction is a verification step rather than an action
pub fn is_assertion(instruction: &str) -> bool {
    let text = instruction.trim();
    if CHECKBOX_ACTION.is_match(text) {
        return false;
    }
    ASSERTION_PREFIX.is_match(text) || ASSERTION_ANYWHERE.is_match(text)
}

/// Classify a raw plan line
pub fn classify_line(raw: &str) -> LineClass {
    if raw.trim().is_empty() {
        return LineClass::Skip(SkipReason::Blank);
    }
    if FENCE_OR_SEPARATOR.is_match(raw) {
        return LineClass::Skip(SkipReason::Separator);
    }
    if STEPS_HEADER.is_match(raw) || LABEL_LINE.is_match(raw) || MARKDOWN_HEADING.is_match(raw) {
        return LineClass::Skip(SkipReason::Header);
    }
    let normalized = strip_enumeration(raw);
    if normalized.is_empty() {
        return LineClass::Skip(SkipReason::Blank);
    }
    if is_assertion(&normalized) {
        return LineClass::Skip(SkipReason::Assertion);
    }
    LineClass::Instruction(normalized)
}

/// Split a chained instruction ("输入密码，然后点击登录") at its first
/// sequencing connector. Returns the head and the optional tail.
pub fn split_compound(instruction: &str) -> (String, Option<String>) {
    if let Some(m) = COMPOUND_SPLIT.find(instruction) {
        let head = instruction[..m.start()].trim();
        let tail = instruction[m.end()..].trim();
        if !head.is_empty() && !tail.is_empty() {
            return (head.to_string(), Some(tail.to_string()));
        }
    }
    (instruction.trim().to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_enumeration() {
        assert_eq!(strip_enumeration("1. Navigate to https://x.test"), "Navigate to https://x.test");
        assert_eq!(strip_enumeration("步骤2：输入用户名 admin"), "输入用户名 admin");
        assert_eq!(strip_enumeration("第3步，点击登录"), "点击登录");
        assert_eq!(strip_enumeration("- 2) click Save"), "click Save");
        assert_eq!(strip_enumeration("Step 4: wait 2 seconds"), "wait 2 seconds");
        assert_eq!(strip_enumeration("（5）然后点击提交"), "点击提交");
    }

    #[test]
    fn test_assertion_lexicon() {
        assert!(is_assertion("验证页面显示欢迎语"));
        assert!(is_assertion("verify the welcome banner is shown"));
        assert!(is_assertion("Check that the cart total is 10"));
        assert!(is_assertion("页面应该跳转到首页"));
        assert!(is_assertion("确认提示信息正确"));
        assert!(!is_assertion("点击确认按钮"));
        assert!(!is_assertion("check the remember me checkbox"));
        assert!(!is_assertion("输入用户名 admin"));
    }

    #[test]
    fn test_strip_expected_section() {
        let plan = "1. 打开首页\n2. 点击登录\n预期结果:\n- 登录成功\n- 跳转首页\n```\n";
        assert_eq!(strip_expected_section(plan), "1. 打开首页\n2. 点击登录");
    }

    #[test]
    fn test_verification_line_is_not_a_section_header() {
        let plan = "点击登录\n期望页面跳转到首页\n预期结果显示欢迎语\n点击退出";
        assert_eq!(strip_expected_section(plan), plan);
        assert!(extract_expected_results(plan).is_empty());
        assert_eq!(classify_line("期望页面跳转到首页"), LineClass::Skip(SkipReason::Assertion));
    }

    #[test]
    fn test_expected_header_forms() {
        assert_eq!(extract_expected_results("期望：跳转到首页"), vec!["跳转到首页"]);
        assert_eq!(extract_expected_results("## 预期结果\n- 登录成功"), vec!["登录成功"]);
        assert_eq!(extract_expected_results("**Expected results:** banner shown"), vec!["banner shown"]);
    }

    #[test]
    fn test_steps_header_ends_expected_section() {
        let plan = "Expected results:\n- banner shown\nSteps:\n1. click Save";
        assert_eq!(strip_expected_section(plan), "Steps:\n1. click Save");
    }

    #[test]
    fn test_extract_expected_results() {
        let plan = "1. 点击登录\n预期结果：页面加载\n- 登录成功跳转到首页\n2) 显示用户名\n---";
        assert_eq!(
            extract_expected_results(plan),
            vec!["页面加载", "登录成功跳转到首页", "显示用户名"]
        );
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("   "), LineClass::Skip(SkipReason::Blank));
        assert_eq!(classify_line("---"), LineClass::Skip(SkipReason::Separator));
        assert_eq!(classify_line("测试步骤："), LineClass::Skip(SkipReason::Header));
        assert_eq!(classify_line("前置条件：已注册"), LineClass::Skip(SkipReason::Header));
        assert_eq!(classify_line("3. 验证登录成功"), LineClass::Skip(SkipReason::Assertion));
        assert_eq!(
            classify_line("3. 点击登录按钮"),
            LineClass::Instruction("点击登录按钮".to_string())
        );
    }

    #[test]
    fn test_split_compound() {
        assert_eq!(
            split_compound("输入密码 123456，然后点击登录"),
            ("输入密码 123456".to_string(), Some("点击登录".to_string()))
        );
        assert_eq!(
            split_compound("type admin; click Login"),
            ("type admin".to_string(), Some("click Login".to_string()))
        );
        assert_eq!(split_compound("点击登录按钮"), ("点击登录按钮".to_string(), None));
    }
}
