// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field normalization for feed items: markup stripping, entity decoding,
//! truncation, durations and publication dates.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use regex::Regex;

/// Maximum description length in characters before truncation
pub const DESCRIPTION_LIMIT: usize = 200;
pub const ELLIPSIS: &str = "...";
pub const DEFAULT_DURATION: &str = "0:00";
pub const UNKNOWN_DATE: &str = "Unknown Date";

// Feeds that escape twice need two passes; anything deeper is left alone.
const MAX_DECODE_PASSES: usize = 3;

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

// Only element-shaped markup, so decoded comparisons like "1 < 2" survive
static DECODED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z][A-Za-z0-9:-]*(?:\s[^<>]*)?/?>").expect("decoded tag pattern is valid")
});

/// Turn feed markup into plain text
///
/// Strips tags, decodes character references, folds typographic quotes to
/// their ASCII forms and collapses runs of whitespace. Markup that only
/// appears once escaped entities are decoded is stripped as well.
pub fn sanitize_text(raw: &str) -> String {
    let stripped = TAG.replace_all(raw, " ");
    let decoded = decode_entities(&stripped);
    let decoded = DECODED_TAG.replace_all(&decoded, " ");

    decoded
        .chars()
        .map(fold_quote)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode named and numeric character references until the text stops changing
pub fn decode_entities(text: &str) -> String {
    let mut decoded = text.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        let next = html_escape::decode_html_entities(&decoded).into_owned();
        if next == decoded {
            break;
        }
        decoded = next;
    }
    decoded
}

fn fold_quote(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
        other => other,
    }
}

/// Cut a description to [`DESCRIPTION_LIMIT`] characters, marking the cut
pub fn truncate_description(text: &str) -> String {
    truncate_chars(text, DESCRIPTION_LIMIT)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Normalize an `itunes:duration` value
///
/// Bare second counts become `minutes:seconds`; anything already textual
/// is passed through.
pub fn normalize_duration(raw: Option<&str>) -> String {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return DEFAULT_DURATION.to_string();
    }

    if raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(seconds) = raw.parse::<u64>() {
            return format_seconds(seconds);
        }
    }

    raw.to_string()
}

/// Render a second count as `minutes:seconds` with zero-padded seconds
pub fn format_seconds(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Format a publication date as `Mon D, YYYY`, or [`UNKNOWN_DATE`]
pub fn format_pub_date(raw: Option<&str>) -> String {
    raw.and_then(parse_pub_date)
        .map(|date| date.format("%b %-d, %Y").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

/// Parse the date formats found in podcast feeds
pub fn parse_pub_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .or_else(|| parse_relaxed_date(raw))
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let zoned = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    for format in zoned {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }

    // Without an offset, assume UTC
    let utc = FixedOffset::east_opt(0)?;
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_local_timezone(utc).single();
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_local_timezone(utc).single())
}
