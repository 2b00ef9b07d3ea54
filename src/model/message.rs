//! Parsed message, its body, and its non-body parts.

use chrono::{DateTime, Utc};

/// Ordered header list with lowercase names and decoded values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The one body representation chosen for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `text/html` markup (preferred when both alternatives exist).
    Html(String),
    /// `text/plain` content.
    Plain(String),
}

/// How a part relates to the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Referenced from the body markup through its Content-ID.
    Inline,
    /// Delivered as a separate file.
    Attachment,
}

/// One non-body node of the message.
#[derive(Debug, Clone)]
pub struct Part {
    /// Position in walk order among the non-body parts.
    pub index: usize,
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Content-ID without angle brackets.
    pub content_id: Option<String>,
    /// Declared or generated filename.
    pub filename: Option<String>,
    pub disposition: Disposition,
    /// Transfer-decoded payload.
    pub payload: Vec<u8>,
}

impl Part {
    /// Filename for display and temporary files.
    pub fn display_name(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("part_{}", self.index))
    }

    /// Lowercase filename extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

/// A fully parsed message. Immutable after parsing.
#[derive(Debug, Clone)]
pub struct Message {
    pub raw: Vec<u8>,
    pub headers: HeaderMap,
    /// Parsed `Date` header.
    pub date: Option<DateTime<Utc>>,
    pub body: Body,
    /// Non-body parts in the order they appear in the MIME tree.
    pub parts: Vec<Part>,
    /// Content-IDs referenced by the body that match no part.
    pub unresolved_cids: Vec<String>,
}

impl Message {
    /// Look up the inline part a `cid:` reference points to.
    pub fn inline_part(&self, cid: &str) -> Option<&Part> {
        self.parts
            .iter()
            .filter(|p| p.disposition == Disposition::Inline)
            .find(|p| p.content_id.as_deref().is_some_and(|id| cid_matches(id, cid)))
    }

    /// Attachments in original order.
    pub fn attachments(&self) -> impl Iterator<Item = &Part> {
        self.parts
            .iter()
            .filter(|p| p.disposition == Disposition::Attachment)
    }

    /// Decoded subject line, or an empty string.
    pub fn subject(&self) -> &str {
        self.headers.get("subject").unwrap_or("")
    }
}

/// Compare a Content-ID with a `cid:` reference.
///
/// Exact match first; Content-IDs are case-sensitive but many clients mangle case.
pub fn cid_matches(content_id: &str, reference: &str) -> bool {
    content_id == reference || content_id.eq_ignore_ascii_case(reference)
}
