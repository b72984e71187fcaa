//! Closed-form intents resolved by pattern alone: tab switching, explicit
//! URL navigation, going back, and fixed waits.

use once_cell::sync::Lazy;
use regex::Regex;

use super::command::{ResolvedCommand, TabSelector, normalize_url};

static TAB_LAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:(?:switch|go|change)\s+to\s+(?:the\s+)?(?:last|latest|newest|new)\s+(?:tab|window)|(?:切换|跳转|转)到?(?:最后一个|最新的?|新的?|最后的?)(?:标签页|标签|页签|窗口|tab))")
        .expect("last tab pattern")
});

static TAB_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:(?:switch|go|change)\s+(?:back\s+)?to\s+(?:the\s+)?(?:first|original|main)\s+(?:tab|window)|(?:切换|跳转|转|回)到?(?:第一个|原来的?|原始的?|主)(?:标签页|标签|页签|窗口|tab))")
        .expect("first tab pattern")
});

static TAB_NTH_EN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:switch|go|change)\s+to\s+(?:the\s+)?(?:tab|window)\s*(?:#|number\s+)?([0-9]+)|(?:switch|go|change)\s+to\s+(?:the\s+)?([0-9]+)(?:st|nd|rd|th)\s+(?:tab|window)|(?:switch|go|change)\s+to\s+(?:the\s+)?(second|third|fourth|fifth)\s+(?:tab|window)")
        .expect("nth tab pattern")
});

static TAB_NTH_ZH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:切换|跳转|转)到?第\s*([0-9]+|[一二三四五六七八九十]+)\s*个?(?:标签页|标签|页签|窗口|tab)")
        .expect("nth tab zh pattern")
});

static TAB_TITLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:(?:switch|go|change)\s+to\s+(?:the\s+)?(?:tab|window)\s+(?:titled|named|called)\s+["“'「]?([^"”'」]+?)["”'」]?\s*$|(?:切换|跳转|转)到?(?:标题为|名为|叫做?)\s*["“'「]?([^"”'」]+?)["”'」]?\s*的?(?:标签页|标签|页签|窗口|tab))"#)
        .expect("titled tab pattern")
});

static URL_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:https?://|file://)[^\s"'“”<>，。）)]+"#).expect("url pattern"));

static NAVIGATE_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:navigate|go|goto|open|visit|browse|load|访问|打开|进入|导航|跳转|前往|浏览)")
        .expect("navigate verb pattern")
});

static GO_BACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:navigate|go)\s+back(?:\s+to\s+the\s+previous\s+page)?|press\s+(?:the\s+)?back\s+button|返回上一页|后退|返回上一级|回到上一页)\s*[.。]?$")
        .expect("go back pattern")
});

static FIXED_WAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:wait|sleep|pause|等待|等|暂停)\s*(?:for\s+)?([0-9]+(?:\.[0-9]+)?)\s*(ms|milliseconds?|s|secs?|seconds?|毫秒|秒钟?)\s*[.。]?$")
        .expect("fixed wait pattern")
});

/// Try every fast-path matcher in order
pub fn match_fast_path(instruction: &str) -> Option<ResolvedCommand> {
    let text = instruction.trim();
    match_tab_switch(text)
        .or_else(|| match_go_back(text))
        .or_else(|| match_fixed_wait(text))
        .or_else(|| match_url_navigation(text))
}

/// "switch to last/first/Nth/titled tab"
pub fn match_tab_switch(text: &str) -> Option<ResolvedCommand> {
    let tab = if let Some(caps) = TAB_TITLED.captures(text) {
        let title = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
        TabSelector::Title { title: title.to_string() }
    } else if TAB_LAST.is_match(text) {
        TabSelector::Last
    } else if TAB_FIRST.is_match(text) {
        TabSelector::First
    } else if let Some(caps) = TAB_NTH_EN.captures(text) {
        let index = match (caps.get(1).or_else(|| caps.get(2)), caps.get(3)) {
            (Some(digits), _) => digits.as_str().parse().ok()?,
            (None, Some(word)) => ordinal_word(word.as_str())?,
            (None, None) => return None,
        };
        TabSelector::Index { index }
    } else if let Some(caps) = TAB_NTH_ZH.captures(text) {
        TabSelector::Index {
            index: usize::try_from(parse_number(&caps[1])?).ok()?,
        }
    } else {
        return None;
    };

    let tab = match tab {
        TabSelector::Index { index: 1 } => TabSelector::First,
        TabSelector::Index { index: 0 } => return None,
        other => other,
    };
    Some(ResolvedCommand::TabSwitch { tab })
}

fn match_go_back(text: &str) -> Option<ResolvedCommand> {
    GO_BACK.is_match(text).then_some(ResolvedCommand::NavigateBack)
}

fn match_fixed_wait(text: &str) -> Option<ResolvedCommand> {
    let caps = FIXED_WAIT.captures(text)?;
    let amount: f64 = caps[1].parse().ok()?;
    let unit = caps[2].to_ascii_lowercase();
    let millis = if unit.starts_with("ms") || unit.starts_with("milli") || unit == "毫秒" {
        amount
    } else {
        amount * 1000.0
    };
    Some(ResolvedCommand::Wait {
        duration_ms: Some(millis.round() as u64),
        text: None,
    })
}

/// Navigation with an explicit URL: the verb must lead and a URL must be present
fn match_url_navigation(text: &str) -> Option<ResolvedCommand> {
    if !NAVIGATE_VERB.is_match(text) {
        return None;
    }
    let url = URL_IN_TEXT.find(text)?;
    Some(ResolvedCommand::Navigate {
        url: normalize_url(url.as_str()),
    })
}

/// First URL mentioned anywhere in the text
pub fn find_url(text: &str) -> Option<String> {
    URL_IN_TEXT.find(text).map(|m| normalize_url(m.as_str()))
}

fn ordinal_word(word: &str) -> Option<usize> {
    match word.to_ascii_lowercase().as_str() {
        "second" => Some(2),
        "third" => Some(3),
        "fourth" => Some(4),
        "fifth" => Some(5),
        _ => None,
    }
}

/// Parse Arabic digits or a Chinese numeral up to 99
pub fn parse_number(s: &str) -> Option<u64> {
    if let Ok(n) = s.parse() {
        return Some(n);
    }
    let digit = |c: char| "零一二三四五六七八九".chars().position(|d| d == c).map(|d| d as u64);
    let chars: Vec<char> = s.chars().collect();
    match chars.as_slice() {
        ['十'] => Some(10),
        ['十', ones] => Some(10 + digit(*ones)?),
        [tens, '十'] => Some(digit(*tens)? * 10),
        [tens, '十', ones] => Some(digit(*tens)? * 10 + digit(*ones)?),
        [single] => digit(*single),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tab(text: &str) -> Option<TabSelector> {
        match match_fast_path(text) {
            Some(ResolvedCommand::TabSwitch { tab }) => Some(tab),
            _ => None,
        }
    }

    #[test]
    fn test_tab_switch_variants() {
        assert_eq!(tab("switch to the last tab"), Some(TabSelector::Last));
        assert_eq!(tab("切换到最新标签页"), Some(TabSelector::Last));
        assert_eq!(tab("Switch back to the first tab"), Some(TabSelector::First));
        assert_eq!(tab("switch to tab 3"), Some(TabSelector::Index { index: 3 }));
        assert_eq!(tab("switch to the second tab"), Some(TabSelector::Index { index: 2 }));
        assert_eq!(tab("切换到第三个标签页"), Some(TabSelector::Index { index: 3 }));
        assert_eq!(tab("切换到第1个标签页"), Some(TabSelector::First));
        assert_eq!(
            tab("switch to the tab titled \"Orders\""),
            Some(TabSelector::Title { title: "Orders".into() })
        );
        assert_eq!(
            tab("切换到标题为「订单」的标签页"),
            Some(TabSelector::Title { title: "订单".into() })
        );
        assert_eq!(tab("点击标签页"), None);
    }

    #[test]
    fn test_url_navigation() {
        assert_eq!(
            match_fast_path("Navigate to https://x.test/login"),
            Some(ResolvedCommand::Navigate {
                url: "https://x.test/login".into()
            })
        );
        assert_eq!(
            match_fast_path("打开 https://x.test/home。"),
            Some(ResolvedCommand::Navigate {
                url: "https://x.test/home".into()
            })
        );
        // a URL that is only mentioned is not a navigation
        assert_eq!(match_fast_path("click the link https://x.test"), None);
    }

    #[test]
    fn test_go_back_and_wait() {
        assert_eq!(match_fast_path("返回上一页"), Some(ResolvedCommand::NavigateBack));
        assert_eq!(match_fast_path("go back"), Some(ResolvedCommand::NavigateBack));
        assert_eq!(
            match_fast_path("等待3秒"),
            Some(ResolvedCommand::Wait {
                duration_ms: Some(3000),
                text: None
            })
        );
        assert_eq!(
            match_fast_path("wait 500 ms"),
            Some(ResolvedCommand::Wait {
                duration_ms: Some(500),
                text: None
            })
        );
        assert_eq!(match_fast_path("wait for the dialog"), None);
    }

    #[test]
    fn test_parse_chinese_numbers() {
        assert_eq!(parse_number("七"), Some(7));
        assert_eq!(parse_number("十二"), Some(12));
        assert_eq!(parse_number("二十"), Some(20));
        assert_eq!(parse_number("二十三"), Some(23));
        assert_eq!(parse_number("12"), Some(12));
        assert_eq!(parse_number("百"), None);
    }
}
