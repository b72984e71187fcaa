//! Candidate extraction: reduce a snapshot to a bounded list of typed,
//! addressable elements for grounding.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::types::{ElementRole, Snapshot};

/// Longest element text kept on a candidate
pub const MAX_CANDIDATE_TEXT: usize = 80;

/// An element offered to the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "ref")]
    pub ref_id: String,
    pub role: ElementRole,
    pub text: String,
    /// Position in document order within the snapshot
    pub index: usize,
}

/// Extract at most `limit` candidates from a snapshot.
///
/// Document order is preserved and generic elements with no text are
/// dropped. Repeated labels are distinct targets (a top and a bottom "首页"
/// link), so (role, text) duplicates are only collapsed when the snapshot
/// exceeds the bound. Past that, interactive roles win over generic elements.
pub fn extract_candidates(snapshot: &Snapshot, limit: usize) -> Vec<Candidate> {
    let mut all: Vec<Candidate> = snapshot
        .elements
        .iter()
        .enumerate()
        .filter_map(|(index, element)| {
            let label = element.label().trim();
            if element.role == ElementRole::Element && label.is_empty() {
                return None;
            }
            Some(Candidate {
                ref_id: element.ref_id.clone(),
                role: element.role,
                text: truncate_chars(label, MAX_CANDIDATE_TEXT),
                index,
            })
        })
        .collect();

    if all.len() <= limit {
        return all;
    }

    // Empty-label inputs are still distinct targets; only dedupe labelled ones.
    let mut seen = HashSet::new();
    all.retain(|c| c.text.is_empty() || seen.insert((c.role, c.text.clone())));
    if all.len() <= limit {
        return all;
    }

    let interactive = all.iter().filter(|c| c.role.is_interactive()).count();
    let mut generic_room = limit.saturating_sub(interactive);
    let mut kept_interactive = 0;
    all.into_iter()
        .filter(|c| {
            if c.role.is_interactive() {
                kept_interactive += 1;
                kept_interactive <= limit
            } else if generic_room > 0 {
                generic_room -= 1;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Render candidates one per line for a resolution prompt
pub fn render_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("[{}] {} \"{}\"", c.ref_id, c.role, c.text.replace('"', "'")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::types::SnapshotElement;

    fn element(ref_id: &str, role: ElementRole, text: &str) -> SnapshotElement {
        SnapshotElement::new(ref_id, role, text)
    }

    #[test]
    fn test_keeps_repeated_labels_within_bound() {
        let snapshot = Snapshot::new(vec![
            element("e1", ElementRole::Element, ""),
            element("e2", ElementRole::Link, "首页"),
            element("e3", ElementRole::Button, "保存"),
            element("e4", ElementRole::Link, "首页"),
            element("e5", ElementRole::Textbox, ""),
            element("e6", ElementRole::Textbox, ""),
        ]);
        let refs: Vec<String> = extract_candidates(&snapshot, 100)
            .into_iter()
            .map(|c| c.ref_id)
            .collect();
        assert_eq!(refs, vec!["e2", "e3", "e4", "e5", "e6"]);
    }

    #[test]
    fn test_duplicates_collapse_only_past_bound() {
        let snapshot = Snapshot::new(vec![
            element("e1", ElementRole::Button, "保存"),
            element("e2", ElementRole::Button, "保存"),
            element("e3", ElementRole::Textbox, ""),
            element("e4", ElementRole::Textbox, ""),
        ]);
        let refs: Vec<String> = extract_candidates(&snapshot, 3)
            .into_iter()
            .map(|c| c.ref_id)
            .collect();
        assert_eq!(refs, vec!["e1", "e3", "e4"]);
    }

    #[test]
    fn test_bound_prefers_interactive_roles() {
        let mut elements = Vec::new();
        for i in 0..150 {
            elements.push(element(&format!("g{}", i), ElementRole::Element, &format!("text {}", i)));
        }
        elements.push(element("b1", ElementRole::Button, "Submit"));
        let snapshot = Snapshot::new(elements);

        let candidates = extract_candidates(&snapshot, 100);
        assert_eq!(candidates.len(), 100);
        assert!(candidates.iter().any(|c| c.ref_id == "b1"));
        // document order is kept
        assert!(candidates.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[test]
    fn test_text_is_truncated() {
        let long = "长".repeat(200);
        let snapshot = Snapshot::new(vec![element("e1", ElementRole::Link, &long)]);
        let candidates = extract_candidates(&snapshot, 10);
        assert_eq!(candidates[0].text.chars().count(), MAX_CANDIDATE_TEXT);
    }

    #[test]
    fn test_render_candidates() {
        let snapshot = Snapshot::new(vec![element("e13", ElementRole::Button, "登录")]);
        let rendered = render_candidates(&extract_candidates(&snapshot, 10));
        assert_eq!(rendered, "[e13] button \"登录\"");
    }
}
