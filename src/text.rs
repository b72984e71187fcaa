//! Text helpers shared by the grounding ranker and the outcome verifier.
//!
//! Keyword extraction handles mixed Latin/CJK text without a dictionary:
//! Latin runs split on whitespace and punctuation; Han runs split on common
//! function characters, and runs of four or more characters are chunked
//! into two-character words (`登录成功` → `登录`, `成功`).

/// Han characters that separate content words
const HAN_STOP_CHARS: &[char] = &[
    '并', '和', '与', '及', '的', '了', '在', '被', '为', '是', '将', '把', '从', '向', '或', '且',
    '到', '至', '于', '之', '也', '都', '就', '而', '已', '请',
];

/// Whether a char is a CJK unified ideograph
pub fn is_han(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// Lowercase and trim
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Extract keywords longer than `min_chars` characters, deduplicated, in order of appearance
pub fn keywords(s: &str, min_chars: usize) -> Vec<String> {
    let lowered = s.to_lowercase();
    let mut tokens: Vec<String> = Vec::new();
    let mut latin = String::new();
    let mut han = String::new();

    let push = |token: String, tokens: &mut Vec<String>| {
        if token.chars().count() > min_chars && !tokens.contains(&token) {
            tokens.push(token);
        }
    };

    for c in lowered.chars() {
        if is_han(c) {
            if !latin.is_empty() {
                push(std::mem::take(&mut latin), &mut tokens);
            }
            if HAN_STOP_CHARS.contains(&c) {
                for word in chunk_han(&std::mem::take(&mut han)) {
                    push(word, &mut tokens);
                }
            } else {
                han.push(c);
            }
        } else if c.is_alphanumeric() {
            if !han.is_empty() {
                for word in chunk_han(&std::mem::take(&mut han)) {
                    push(word, &mut tokens);
                }
            }
            latin.push(c);
        } else {
            if !latin.is_empty() {
                push(std::mem::take(&mut latin), &mut tokens);
            }
            if !han.is_empty() {
                for word in chunk_han(&std::mem::take(&mut han)) {
                    push(word, &mut tokens);
                }
            }
        }
    }
    if !latin.is_empty() {
        push(latin, &mut tokens);
    }
    if !han.is_empty() {
        for word in chunk_han(&han) {
            push(word, &mut tokens);
        }
    }
    tokens
}

/// Chunk a Han run into words: short runs stay whole, longer runs become pairs
fn chunk_han(run: &str) -> Vec<String> {
    let chars: Vec<char> = run.chars().collect();
    if chars.len() <= 3 {
        return if chars.is_empty() { Vec::new() } else { vec![run.to_string()] };
    }
    let mut words: Vec<String> = chars.chunks(2).map(|pair| pair.iter().collect()).collect();
    // an odd trailing char joins the previous pair
    if chars.len() % 2 == 1 {
        if let Some(last) = words.pop() {
            if let Some(prev) = words.last_mut() {
                prev.push_str(&last);
            }
        }
    }
    words
}
