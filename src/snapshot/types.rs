// Core types for UI snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Role of an interactive element, normalized from the backend's role names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementRole {
    Textbox,
    Button,
    Link,
    Checkbox,
    Combobox,
    Listitem,
    Element,
}

impl ElementRole {
    /// Map an accessibility role name onto the closed role set
    pub fn from_backend(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "textbox" | "searchbox" | "textarea" | "spinbutton" | "input" => ElementRole::Textbox,
            "button" | "tab" | "menuitemcheckbox" | "menuitemradio" => ElementRole::Button,
            "link" => ElementRole::Link,
            "checkbox" | "radio" | "switch" => ElementRole::Checkbox,
            "combobox" | "listbox" | "select" => ElementRole::Combobox,
            "listitem" | "option" | "menuitem" | "treeitem" | "gridcell" => ElementRole::Listitem,
            _ => ElementRole::Element,
        }
    }

    /// Roles a user can act on directly
    pub fn is_interactive(self) -> bool {
        !matches!(self, ElementRole::Element)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementRole::Textbox => "textbox",
            ElementRole::Button => "button",
            ElementRole::Link => "link",
            ElementRole::Checkbox => "checkbox",
            ElementRole::Combobox => "combobox",
            ElementRole::Listitem => "listitem",
            ElementRole::Element => "element",
        }
    }
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable element in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotElement {
    /// Backend-issued reference, opaque and only valid for this snapshot
    #[serde(rename = "ref")]
    pub ref_id: String,

    pub role: ElementRole,

    /// Accessible name or visible text
    pub text: String,

    /// Placeholder hint, kept for grounding only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    /// Current value of an input, kept for grounding only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Link destination, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SnapshotElement {
    pub fn new(ref_id: impl Into<String>, role: ElementRole, text: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            role,
            text: text.into(),
            placeholder: None,
            value: None,
            url: None,
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Text used for matching: the name, or the placeholder when the name is empty
    pub fn label(&self) -> &str {
        if self.text.trim().is_empty() {
            self.placeholder.as_deref().unwrap_or("")
        } else {
            &self.text
        }
    }
}

/// A point-in-time view of the interactive elements on the page.
///
/// Snapshots are immutable once captured. Each resolution gets a fresh one;
/// `id` lets the engine assert that a capture is never reused across steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,

    pub elements: Vec<SnapshotElement>,

    /// Timestamp when the snapshot was captured
    #[serde(with = "chrono::serde::ts_seconds")]
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot from already-parsed elements
    pub fn new(elements: Vec<SnapshotElement>) -> Self {
        Self {
            id: NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed),
            page_url: None,
            page_title: None,
            elements,
            captured_at: Utc::now(),
        }
    }

    pub fn with_page(mut self, url: Option<String>, title: Option<String>) -> Self {
        self.page_url = url;
        self.page_title = title;
        self
    }

    /// Look up an element by reference
    pub fn find(&self, ref_id: &str) -> Option<&SnapshotElement> {
        self.elements.iter().find(|e| e.ref_id == ref_id)
    }

    pub fn contains_ref(&self, ref_id: &str) -> bool {
        self.find(ref_id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}
