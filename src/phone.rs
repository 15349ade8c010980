//! Phone number extraction and normalization.
//!
//! Call providers send the contacted number under many different names, or
//! only inside free text. Extraction walks a fixed priority list of field
//! names and then falls back to a digit-run scan; normalization turns the
//! result into `+<country><national>` form.

use std::sync::LazyLock;

use regex::Regex;

use crate::platform::{field_text, Payload};

/// Field names checked in order, body first, then query.
pub const PHONE_KEYS: &[&str] = &[
    "phone",
    "number",
    "client_phone",
    "abonent_number",
    "caller",
    "to",
    "ct_phone",
    "ct_phone8",
    "ct_phone9",
];

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?[0-9]{10,15}").expect("invalid phone regex"));

/// First value under one of [`PHONE_KEYS`].
pub fn pick_phone_field(fields: &Payload) -> Option<String> {
    PHONE_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(field_text))
}

/// First digit run found in any string-valued field.
pub fn scan_fields(fields: &Payload) -> Option<String> {
    fields
        .values()
        .filter_map(|v| v.as_str())
        .find_map(scan_text)
}

pub fn scan_text(text: &str) -> Option<String> {
    PHONE_RE.find(text).map(|m| m.as_str().to_string())
}

/// Candidate phone in priority order; empty string when nothing matched.
pub fn extract_phone(body: &Payload, query: &Payload, raw_body: &str) -> String {
    pick_phone_field(body)
        .or_else(|| pick_phone_field(query))
        .or_else(|| scan_fields(body))
        .or_else(|| scan_fields(query))
        .or_else(|| scan_text(raw_body))
        .unwrap_or_default()
}

/// Normalize a candidate into `+<digits>`, or `""` if it is not usable.
///
/// Eleven digits starting with `8` are a Russian trunk-prefixed number and
/// are rewritten to `+7`. Ten digits get `default_country_code` prepended,
/// which is wrong for a ten-digit number from another country; that is a
/// known limitation of the heuristic.
pub fn normalize_phone(candidate: &str, default_country_code: &str) -> String {
    let digits: String = candidate.chars().filter(char::is_ascii_digit).collect();
    let country: String = default_country_code
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    match digits.len() {
        0 => String::new(),
        11 if digits.starts_with('8') => format!("+7{}", &digits[1..]),
        11 if digits.starts_with('7') => format!("+{digits}"),
        10 => format!("+{country}{digits}"),
        n if n >= 11 => format!("+{digits}"),
        _ => String::new(),
    }
}
