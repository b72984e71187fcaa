//! Deterministic candidate ranking.
//!
//! Ranks snapshot candidates against an instruction by match quality
//! (exact > contains > partial), by the roles the instruction's intent calls
//! for, and by position words. The same rules post-correct a semantic
//! backend's choice when it picks the wrong role for a dropdown or menu.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::snapshot::{Candidate, ElementRole};
use crate::text::{keywords, normalize};

static SELECT_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:\bselect\b|\bchoose\b|\bpick\b|选择|选中|选取)").expect("select verb"));

static CHECK_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:勾选|打勾|^(?:un)?tick\b|^(?:un)?check\b.*\b(?:checkbox|check\s+box|box|radio|toggle)\b)")
        .expect("check verb")
});

static OPEN_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:\bopen\b|\bexpand\b|\bshow\b|打开|展开|点开)").expect("open verb"));

static DROPDOWN_NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:dropdown|drop-down|combo\s*box|select\s+box|picker|下拉|选择框|选择器|列表框)")
        .expect("dropdown noun")
});

static MENU_NOUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:\bmenu\b|菜单|导航栏|\bnav(?:igation)?\b)").expect("menu noun"));

static TYPE_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:输入|填写|填入|键入|录入|^type\b|^enter\b|^fill\b|^input\b)").expect("type verb")
});

static CLICK_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bclick\b|\btap\b|\bpress\b|\bhit\b|点击|单击|双击|按下|轻触)").expect("click verb")
});

static BOTTOM_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bbottom\b|\blast\b|\bfooter\b|底部|底端|下方|最后|最下|末尾)").expect("bottom words")
});

static TOP_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\btop\b|\bfirst\b|\bheader\b|顶部|顶端|上方|第一个|最上|开头)").expect("top words")
});

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”|'([^']+)'|「([^」]+)」|‘([^’]+)’"#).expect("quoted"));

static ZH_FIELD_BEFORE_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"在\s*(.+?)\s*(?:输入框|输入栏|文本框|框|栏)?\s*(?:中|里|内)?\s*(?:输入|填写|填入|键入|录入)")
        .expect("zh field before verb")
});

static ZH_FIELD_AFTER_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:输入|填写|填入|键入|录入)\s*([\p{Han}]+?)(?:为|是|[:：\s])").expect("zh field after verb"));

static EN_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\binto\b|\bin\b)\s+(?:the\s+)?(.+?)(?:\s+(?:field|box|input|textbox))?\s*$|^fill\s+(?:in\s+|out\s+)?(?:the\s+)?(.+?)(?:\s+(?:field|box|input))?\s+with\b|\bas\s+(?:the\s+)?(.+?)\s*$")
        .expect("en field")
});

static ZH_SELECT_IN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:在|从).+?(?:中|里|内)\s*(?:选择|选中|选取|勾选)\s*(.+)$").expect("zh select in"));

static LEADING_FILLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:please\s+)?(?:double[\s-]?click|click\s+on|click|tap\s+on|tap|press|hit|select|choose|pick|open|expand|show|hover\s+over|hover|go\s+to|请|点击|单击|双击|按下|轻触|选择|选中|选取|勾选|打开|展开|点开|悬停在|鼠标悬停在|在)\s*)+(?:(?:the|a|an)\s+)?")
        .expect("leading filler")
});

static TRAILING_NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:按钮|链接|菜单项|菜单|选项|下拉框|下拉菜单|下拉列表|输入框|复选框|标签页|标签|图标|\s+(?:button|link|menu\s+item|menu|option|item|dropdown|checkbox|tab|icon|field))\s*$")
        .expect("trailing noun")
});

static POSITION_FILLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^(?:bottom|top|last|first|footer|header)\s+|(?:底部|顶部|底端|顶端|最后一个|第一个|最下方|最上方|下方|上方)的?)")
        .expect("position filler")
});

/// What the instruction wants to do with its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Choose an option: select/choose/选择
    Select,
    /// Tick or untick a checkbox: 勾选
    Check,
    /// Open a dropdown without selecting
    Open,
    /// Click an entry of a menu
    MenuClick,
    Type,
    Click,
    Other,
}

/// Where on the page the instruction places its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Top,
    Bottom,
}

/// How well a candidate's text matches the named item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchQuality {
    Partial = 1,
    Contains = 2,
    Exact = 3,
}

pub fn detect_intent(instruction: &str) -> Intent {
    let text = instruction.trim();
    if CHECK_VERB.is_match(text) {
        return Intent::Check;
    }
    if SELECT_VERB.is_match(text) {
        return Intent::Select;
    }
    if OPEN_VERB.is_match(text) && DROPDOWN_NOUN.is_match(text) {
        return Intent::Open;
    }
    if MENU_NOUN.is_match(text) && (CLICK_VERB.is_match(text) || OPEN_VERB.is_match(text)) {
        return Intent::MenuClick;
    }
    if TYPE_VERB.is_match(text) {
        return Intent::Type;
    }
    if CLICK_VERB.is_match(text) {
        return Intent::Click;
    }
    if OPEN_VERB.is_match(text) {
        return Intent::Open;
    }
    Intent::Other
}

pub fn detect_position(instruction: &str) -> Option<Position> {
    if BOTTOM_WORDS.is_match(instruction) {
        Some(Position::Bottom)
    } else if TOP_WORDS.is_match(instruction) {
        Some(Position::Top)
    } else {
        None
    }
}

/// Roles that satisfy an intent, most preferred first
pub fn preferred_roles(intent: Intent) -> &'static [ElementRole] {
    match intent {
        Intent::Select => &[ElementRole::Listitem],
        Intent::Check => &[ElementRole::Checkbox, ElementRole::Listitem],
        Intent::Open => &[ElementRole::Combobox, ElementRole::Textbox],
        Intent::MenuClick => &[ElementRole::Button, ElementRole::Link, ElementRole::Listitem],
        Intent::Type => &[ElementRole::Textbox, ElementRole::Combobox],
        Intent::Click => &[
            ElementRole::Button,
            ElementRole::Link,
            ElementRole::Checkbox,
            ElementRole::Listitem,
        ],
        Intent::Other => &[],
    }
}

/// Name of the element the instruction refers to
pub fn extract_item_name(instruction: &str) -> Option<String> {
    let text = instruction.trim();
    let intent = detect_intent(text);

    if intent == Intent::Type {
        return type_field_name(text);
    }

    if let Some(caps) = QUOTED.captures(text) {
        let quoted = (1..=5).find_map(|i| caps.get(i))?.as_str().trim();
        if !quoted.is_empty() {
            return Some(quoted.to_string());
        }
    }

    if matches!(intent, Intent::Select | Intent::Check) {
        if let Some(caps) = ZH_SELECT_IN.captures(text) {
            let item = strip_trailing_noun(caps[1].trim());
            if !item.is_empty() {
                return Some(item);
            }
        }
    }

    let stripped = LEADING_FILLER.replace(text, "");
    let stripped = POSITION_FILLER.replace_all(&stripped, "");
    let item = strip_trailing_noun(stripped.trim());
    (!item.is_empty()).then_some(item)
}

fn type_field_name(text: &str) -> Option<String> {
    if let Some(caps) = ZH_FIELD_BEFORE_VERB.captures(text) {
        let field = caps[1].trim().trim_matches(['"', '“', '”', '「', '」']);
        if !field.is_empty() {
            return Some(field.to_string());
        }
    }
    if let Some(caps) = ZH_FIELD_AFTER_VERB.captures(text) {
        return Some(caps[1].to_string());
    }
    let caps = EN_FIELD.captures(text)?;
    let field = (1..=3).find_map(|i| caps.get(i))?.as_str().trim();
    (!field.is_empty()).then(|| field.trim_matches(['"', '\'']).to_string())
}

fn strip_trailing_noun(s: &str) -> String {
    TRAILING_NOUN.replace(s, "").trim().to_string()
}

/// Match quality of a candidate text against an item name
pub fn match_quality(candidate_text: &str, item: &str) -> Option<MatchQuality> {
    let candidate = normalize(candidate_text);
    let item = normalize(item);
    if candidate.is_empty() || item.is_empty() {
        return None;
    }
    if candidate == item {
        return Some(MatchQuality::Exact);
    }
    if candidate.contains(&item) || (item.contains(&candidate) && candidate.chars().count() > 1) {
        return Some(MatchQuality::Contains);
    }
    keywords(&item, 1)
        .iter()
        .any(|keyword| candidate.contains(keyword.as_str()))
        .then_some(MatchQuality::Partial)
}

/// A candidate with its score and match quality
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub candidate: Candidate,
    pub quality: Option<MatchQuality>,
    pub score: i64,
}

/// Rank candidates best first; ties keep document order
pub fn rank(instruction: &str, candidates: &[Candidate]) -> Vec<Ranked> {
    let intent = detect_intent(instruction);
    let roles = preferred_roles(intent);
    let position = detect_position(instruction);
    let item = extract_item_name(instruction);
    let total = candidates.len().max(1) as i64;

    let mut ranked: Vec<Ranked> = candidates
        .iter()
        .enumerate()
        .map(|(order, candidate)| {
            let quality = item.as_deref().and_then(|item| match_quality(&candidate.text, item));
            let mut score = quality.map_or(0, |q| q as i64 * 100);
            if let Some(pos) = roles.iter().position(|r| *r == candidate.role) {
                score += 40 - 5 * pos as i64;
            }
            score += match position {
                Some(Position::Bottom) => order as i64 * 20 / total,
                Some(Position::Top) => (total - order as i64) * 20 / total,
                None => 0,
            };
            Ranked {
                candidate: candidate.clone(),
                quality,
                score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// Best candidate that matches the named item at all
pub fn best_match(instruction: &str, candidates: &[Candidate]) -> Option<Candidate> {
    rank(instruction, candidates)
        .into_iter()
        .find(|r| r.quality.is_some())
        .map(|r| r.candidate)
}

/// Replace a chosen candidate whose role contradicts the instruction's intent.
///
/// - select/choose must land on a list item
/// - open/expand a dropdown must land on its textbox/combobox trigger
/// - menu clicks must land on a button, link or list item
///
/// Returns the replacement, or `None` when the choice stands.
pub fn correct_choice(instruction: &str, chosen: &Candidate, candidates: &[Candidate]) -> Option<Candidate> {
    let intent = detect_intent(instruction);
    let roles = preferred_roles(intent);
    let violates = match intent {
        Intent::Select | Intent::Open | Intent::MenuClick => !roles.contains(&chosen.role),
        _ => false,
    };
    if !violates {
        return None;
    }

    let ranked = rank(instruction, candidates);
    let fits = |r: &&Ranked| roles.contains(&r.candidate.role);
    let replacement = match intent {
        // the trigger rarely carries the option's text, so role alone decides
        Intent::Open => ranked.iter().find(fits),
        _ => ranked.iter().filter(fits).find(|r| r.quality.is_some()),
    }?;
    (replacement.candidate.ref_id != chosen.ref_id).then(|| replacement.candidate.clone())
}
