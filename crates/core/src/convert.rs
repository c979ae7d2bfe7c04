//! Text repair helpers for dirty legacy data.
//!
//! The legacy store is full of historical garbage: control characters,
//! hard tabs, HTML markup in plain-text fields, `Name <addr>` e-mail
//! values, naive timestamps. Everything user-visible goes through the
//! functions in this module before it reaches the target database.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

/// Clean a raw legacy string: strip ASCII control characters, expand hard
/// tabs to four spaces, and trim surrounding whitespace.
pub fn clean_text(val: &str) -> String {
    let expanded = val.replace('\t', "    ");
    let cleaned: String = expanded
        .chars()
        .filter(|&c| {
            !matches!(c, '\u{00}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}')
        })
        .collect();
    cleaned.trim().to_string()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(val: &str) -> String {
    ws_re().replace_all(val, " ").trim().to_string()
}

/// Remove HTML tags.
pub fn strip_tags(val: &str) -> String {
    tag_re().replace_all(val, "").to_string()
}

/// Unescape the handful of HTML entities that show up in legacy titles.
pub fn unescape_entities(val: &str) -> String {
    val.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#34;", "\"")
        .replace("&amp;", "&")
}

/// Full cleanup for titles and other single-line user input: tag removal,
/// entity unescaping, whitespace collapsing.
pub fn sanitize_user_input(val: &str) -> String {
    normalize_whitespace(&unescape_entities(&strip_tags(&clean_text(val))))
}

/// Whether a string looks like a single valid e-mail address.
pub fn is_valid_email(val: &str) -> bool {
    email_re().is_match(val)
}

/// Try to repair a legacy e-mail value.
///
/// Handles `Name <addr@host>` forms by extracting the bracketed part,
/// lowercases, and validates. Returns `None` when nothing usable remains.
pub fn sanitize_email(val: &str) -> Option<String> {
    let mut email = clean_text(val).to_lowercase();
    if let (Some(start), Some(end)) = (email.find('<'), email.rfind('>')) {
        if start < end {
            email = email[start + 1..end].trim().to_string();
        }
    }
    if is_valid_email(&email) {
        Some(email)
    } else {
        None
    }
}

/// Like [`sanitize_email`], but substitutes `fallback` for unrepairable
/// garbage instead of failing.
pub fn strict_sanitize_email(val: &str, fallback: &str) -> String {
    sanitize_email(val).unwrap_or_else(|| fallback.to_string())
}

/// Split a free-form e-mail list field on whitespace, commas and semicolons,
/// returning the sorted set of valid addresses.
pub fn split_email_list(val: &str) -> Vec<String> {
    let mut emails: Vec<String> = val
        .split(|c: char| c.is_whitespace() || c == ';' || c == ',')
        .filter_map(sanitize_email)
        .collect();
    emails.sort();
    emails.dedup();
    emails
}

/// Produce a filesystem-safe filename, falling back to `fallback` when
/// nothing survives the sanitation.
pub fn secure_filename(name: &str, fallback: &str) -> String {
    let cleaned: String = clean_text(name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// A parsed legacy timestamp.
///
/// `was_naive` is set when the value carried no UTC offset; such values are
/// interpreted as UTC and callers are expected to warn about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDateTime {
    pub dt: DateTime<Utc>,
    pub was_naive: bool,
}

/// Parse a legacy timestamp: RFC 3339 first, then a handful of naive
/// formats seen in old exports.
pub fn parse_datetime(val: &str) -> Option<ParsedDateTime> {
    let val = val.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(val) {
        return Some(ParsedDateTime {
            dt: dt.with_timezone(&Utc),
            was_naive: false,
        });
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(val, fmt) {
            return Some(ParsedDateTime {
                dt: Utc.from_utc_datetime(&naive),
                was_naive: true,
            });
        }
    }
    None
}

/// French month abbreviations found in ancient reservation history entries.
const FRENCH_MONTHS: &[(&str, u32)] = &[
    ("jan", 1),
    ("fév", 2),
    ("mar", 3),
    ("avr", 4),
    ("mai", 5),
    ("jui", 6),
    ("juil", 7),
    ("aoû", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("déc", 12),
];

/// Parse the `02 Jul 2014 14:00` timestamps used by legacy edit-log
/// entries. Some very old entries use French month names.
pub fn parse_legacy_log_datetime(val: &str) -> Option<NaiveDateTime> {
    let val = val.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(val, "%d %b %Y %H:%M") {
        return Some(dt);
    }
    // French month name: longest abbreviation first so "juil" wins over "jui".
    let lowered = val.to_lowercase();
    let mut months: Vec<_> = FRENCH_MONTHS.to_vec();
    months.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    for (name, num) in months {
        if lowered.contains(name) {
            let replaced = lowered.replacen(name, &num.to_string(), 1);
            if let Ok(dt) = NaiveDateTime::parse_from_str(&replaced, "%d %m %Y %H:%M") {
                return Some(dt);
            }
        }
    }
    None
}

/// Loose plausibility check for legacy timezone names (`Region/City` or
/// `UTC`). The legacy store contains plenty of junk values; anything
/// implausible falls back to the server default.
pub fn is_plausible_timezone(val: &str) -> bool {
    if val == "UTC" {
        return true;
    }
    let mut parts = val.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(region), Some(city)) => {
            !region.is_empty()
                && !city.is_empty()
                && region.chars().all(|c| c.is_ascii_alphabetic())
                && city
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '/'))
        }
        _ => false,
    }
}
