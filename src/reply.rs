//! Normalization and strict decoding of raw model replies.
//!
//! Models often wrap JSON in markdown code fences, sometimes with a line of
//! prose before or after. The fences are removed and the remainder must be
//! strict JSON. Near-miss JSON (trailing commas, single quotes) is rejected,
//! not repaired.

use crate::error::{RelayError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// A complete fenced block inside surrounding prose. The opening fence must
/// end its line and the closing fence must start one.
fn fenced_block() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    FENCED.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n[ \t]*```")
            .expect("Invalid regex pattern")
    })
}

/// An opening fence at the very start, optionally tagged `json`.
fn leading_fence() -> &'static Regex {
    static LEADING: OnceLock<Regex> = OnceLock::new();
    LEADING.get_or_init(|| Regex::new(r"^```(?i:json)?\s*").expect("Invalid regex pattern"))
}

/// A closing fence at the very end.
fn trailing_fence() -> &'static Regex {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    TRAILING.get_or_init(|| Regex::new(r"\s*```$").expect("Invalid regex pattern"))
}

/// Strip a leading and a trailing code fence and surrounding whitespace.
///
/// Only fences anchored at the start and end of the reply are removed, so
/// backticks inside JSON strings are left alone. Without fences this is just
/// a trim. A truncated reply with only an opening fence loses that fence.
pub fn normalize_reply(raw: &str) -> &str {
    let trimmed = raw.trim();

    let start = leading_fence().find(trimmed).map(|m| m.end()).unwrap_or(0);
    let rest = &trimmed[start..];
    let end = trailing_fence()
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    rest[..end].trim()
}

/// Normalize a model reply and decode it as strict JSON.
///
/// Tried in order: the trimmed reply as-is, the reply with its outer fences
/// stripped, then the body of the first fenced block surrounded by prose.
pub fn parse_reply(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RelayError::UnparseableReply("reply is empty".to_string()));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let cleaned = normalize_reply(trimmed);
    let first_error = match serde_json::from_str(cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(body) = fenced_block().captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(body.as_str().trim()) {
            return Ok(value);
        }
    }

    if cleaned.is_empty() {
        return Err(RelayError::UnparseableReply("reply is empty".to_string()));
    }
    log::debug!("Reply that failed to parse: {}", cleaned);
    Err(RelayError::UnparseableReply(first_error.to_string()))
}
