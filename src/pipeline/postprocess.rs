//! Post-processing: optional server-side check of the provider's JSON.
//!
//! The raw provider text is always returned untouched. When output
//! validation is enabled, a cleaned copy is parsed into
//! [`crate::output::Extraction`]; failure to parse fails the request with
//! [`ExtractError::InvalidOutput`].
//!
//! ## Rule Order
//!
//! 1. Strip invisible Unicode (BOM, zero-width spaces) that breaks parsers
//! 2. Strip an outer ```` ```json ```` fence, which models add despite the instruction
//! 3. Parse

use crate::error::ExtractError;
use crate::output::Extraction;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean `raw` and parse it as an [`Extraction`].
pub fn parse_extraction(raw: &str) -> Result<Extraction, ExtractError> {
    let cleaned = clean_json_text(raw);
    if cleaned.is_empty() {
        return Err(ExtractError::InvalidOutput {
            detail: "response is empty".to_string(),
        });
    }
    serde_json::from_str(&cleaned).map_err(|e| ExtractError::InvalidOutput {
        detail: e.to_string(),
    })
}

/// Apply the cleanup rules without parsing.
pub fn clean_json_text(raw: &str) -> String {
    let s = remove_invisible_chars(raw);
    strip_json_fences(&s).trim().to_string()
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

fn strip_json_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}
