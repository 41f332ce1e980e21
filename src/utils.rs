//! Text, timestamp, and filesystem helpers shared by the pipeline.
//!
//! - Whitespace normalization and word counting for extracted text
//! - Timestamp parsing for `<meta>` values and visible bylines
//! - String truncation for logging
//! - Database directory preparation

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use tokio::fs;
use tracing::{debug, instrument};

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of whitespace-delimited tokens in `s`.
pub fn count_words(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at the last char boundary before `max` bytes and get
/// `"…(+N bytes)"` appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Parse a machine-readable timestamp such as a `<meta>` or `datetime`
/// attribute value.
///
/// Accepts RFC 3339, RFC 2822, ISO-8601 with a `+hhmm` offset, naive
/// ISO-8601 date-times, and bare dates. Values without an offset are taken
/// as UTC. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Parse a human-readable byline date such as
/// `"Published March 10, 2024 at 5:30 p.m. EDT"`.
///
/// Tries [`parse_timestamp`] first, then strips byline prefixes, `at`,
/// commas and timezone abbreviations and matches common US long forms. The
/// wall-clock time is stored as UTC because bylines carry no reliable offset.
pub fn parse_loose_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Some(dt) = parse_timestamp(raw) {
        return Some(dt);
    }

    let mut s = raw.trim();
    for prefix in ["published", "updated", "posted", "on"] {
        if s.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            s = s[prefix.len()..].trim_start_matches(':').trim_start();
        }
    }
    let cleaned = s
        .replace("a.m.", "AM")
        .replace("p.m.", "PM")
        .replace(',', " ");
    let cleaned = cleaned
        .split_whitespace()
        .filter(|t| !t.eq_ignore_ascii_case("at") && !is_timezone_token(t))
        .collect::<Vec<_>>()
        .join(" ");

    for fmt in [
        "%B %d %Y %I:%M %p",
        "%B %d %Y %I %p",
        "%B %d %Y %H:%M",
        "%m/%d/%Y %I:%M %p",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    for fmt in ["%B %d %Y", "%m/%d/%Y", "%d %B %Y"] {
        if let Some(naive) = NaiveDate::parse_from_str(&cleaned, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    debug!(raw, "Unparsable date text");
    None
}

fn is_timezone_token(t: &str) -> bool {
    matches!(t, "UTC" | "GMT")
        || ((2..=4).contains(&t.len())
            && t.ends_with('T')
            && t.chars().all(|c| c.is_ascii_uppercase()))
}

/// Current time as an RFC 3339 string, used for the `scraped_at` column.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Ensure the directory that will hold `path` exists.
///
/// # Errors
///
/// Returns the underlying IO error if the directory cannot be created.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
