//! Upstream Rate Limit Signals
//!
//! Detects upstream throttling and reads the hold-off the provider asks for.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;

/// Headers consulted for a hold-off, in order of preference
const RETRY_HEADERS: [&str; 2] = ["retry-after", "x-ratelimit-reset-requests"];

/// Whether the upstream refused the request for rate limiting
pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

/// Hold-off requested by the upstream, if any header carries one
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    RETRY_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        parse_duration_string(value)
    })
}

/// Parse a duration string like "1m30s", "6.5s" or "2h" into a Duration
pub(crate) fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Some(stripped) = s.strip_suffix("ms") {
        return stripped.parse::<u64>().ok().map(Duration::from_millis);
    }

    // compound forms like "1m30s" or "2h30m"
    if s.contains('h') || (s.contains('m') && s.contains('s')) {
        let mut total_secs = 0f64;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() || c == '.' {
                current_num.push(c);
            } else if !current_num.is_empty() {
                let n = current_num.parse::<f64>().ok()?;
                match c {
                    'h' => total_secs += n * 3600.0,
                    'm' => total_secs += n * 60.0,
                    's' => total_secs += n,
                    _ => return None,
                }
                current_num.clear();
            } else {
                return None;
            }
        }

        if total_secs > 0.0 && current_num.is_empty() {
            return Duration::try_from_secs_f64(total_secs).ok();
        }
        return None;
    }

    let (number, scale) = if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1.0)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60.0)
    } else {
        return None;
    };

    let value = number.parse::<f64>().ok()?;
    Duration::try_from_secs_f64(value * scale).ok()
}
