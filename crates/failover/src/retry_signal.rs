//! Wait-time hints from failure responses
//!
//! Providers report how long to back off either in a `Retry-After` header or
//! only in free text ("try again in 20s", "limit resets in 2 minutes").

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};

static SECONDS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(s|sec|second)").expect("invalid seconds regex"));

static MINUTES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(m|min|minute)").expect("invalid minutes regex"));

/// Wait time in seconds mentioned in `text`, if any. Minute counts that
/// overflow saturate at `u64::MAX`.
///
/// A seconds mention anywhere in the text wins over a minutes mention.
pub fn extract_wait_seconds(text: &str) -> Option<u64> {
    if let Some(secs) = first_number(&SECONDS_PATTERN, text) {
        return Some(secs);
    }
    first_number(&MINUTES_PATTERN, text).map(|mins| mins.saturating_mul(60))
}

fn first_number(pattern: &Regex, text: &str) -> Option<u64> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Numeric `Retry-After` header value in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
