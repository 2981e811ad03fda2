//! Site preview promotion
//!
//! Replies that contain a complete HTML document become the live preview.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOCUMENT_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<!doctype\s+html|<html[\s>]").expect("document start pattern is valid")
});

static DOCUMENT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</html\s*>").expect("document end pattern is valid"));

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_-]*[ \t]*$").expect("fence pattern is valid"));

/// HTML currently shown as the site preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub html: String,
    /// Message the document was taken from
    pub message_id: String,
    pub updated_at: DateTime<Utc>,
}

impl Preview {
    pub fn new(html: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            message_id: message_id.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Pull an HTML document out of a reply
///
/// Markdown fences are dropped first. The document runs from the doctype
/// or `<html` root through the closing `</html>`, or to the end of the text
/// when the reply was cut short.
pub fn extract_html(text: &str) -> Option<String> {
    let unfenced = CODE_FENCE.replace_all(text, "");
    let start = DOCUMENT_START.find(&unfenced)?.start();
    let rest = &unfenced[start..];

    let document = match DOCUMENT_END.find(rest) {
        Some(end) => &rest[..end.end()],
        None => rest,
    };
    Some(document.trim().to_string())
}
