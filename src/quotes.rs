//! Quote extraction: picks the quoted dialogue out of a chat message.
//!
//! With `extract_only` set, every non-overlapping `left … right` span is a
//! segment. The span body is any run of characters not contained in the right
//! mark. Messages without a single match are spoken whole.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_LEFT: &str = "「";
const DEFAULT_RIGHT: &str = "」";

/// Named quotation mark pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotationStyle {
    #[default]
    Japanese,
    Western,
    Chinese,
    French,
    Single,
    Guillemet,
    Custom,
}

impl QuotationStyle {
    /// Fixed marks for the style, `None` for `Custom`.
    pub fn marks(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Japanese => Some(("「", "」")),
            Self::Western => Some(("\"", "\"")),
            Self::Chinese => Some(("“", "”")),
            Self::French => Some(("«", "»")),
            Self::Single => Some(("'", "'")),
            Self::Guillemet => Some(("『", "』")),
            Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteMarks {
    pub left: String,
    pub right: String,
}

impl QuoteMarks {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    /// Resolve a style into concrete marks. Empty custom marks fall back to 「」.
    pub fn for_style(style: QuotationStyle, custom_left: &str, custom_right: &str) -> Self {
        match style.marks() {
            Some((left, right)) => Self::new(left, right),
            None => Self::new(
                if custom_left.is_empty() { DEFAULT_LEFT } else { custom_left },
                if custom_right.is_empty() { DEFAULT_RIGHT } else { custom_right },
            ),
        }
    }

    fn pattern(&self) -> String {
        let excluded: String = self
            .right
            .chars()
            .map(|c| regex::escape(&c.to_string()))
            .collect();
        format!(
            "{}([^{}]+){}",
            regex::escape(&self.left),
            excluded,
            regex::escape(&self.right)
        )
    }
}

impl Default for QuoteMarks {
    fn default() -> Self {
        Self::new(DEFAULT_LEFT, DEFAULT_RIGHT)
    }
}

/// Split a message into the ordered segments to speak.
pub fn extract(text: &str, marks: &QuoteMarks, extract_only: bool) -> Vec<String> {
    let whole = || {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        }
    };

    if !extract_only || marks.left.is_empty() || marks.right.is_empty() {
        return whole();
    }

    let re = match Regex::new(&marks.pattern()) {
        Ok(re) => re,
        Err(e) => {
            warn!("Invalid quotation marks {:?}/{:?}: {e}", marks.left, marks.right);
            return whole();
        }
    };

    let segments: Vec<String> = re
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if segments.is_empty() {
        whole()
    } else {
        segments
    }
}
