use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 6;
pub const MAX_BACKOFF_SECS: f64 = 180.0;

/// Matches a `(\d+m)?([\d.]+s)` retry-after hint embedded in an upstream
/// error body, e.g. "please retry in 1m30s" or "retry after 4.5s".
static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:(\d+)m)?([\d.]+)s").expect("valid regex"));

/// Parses a retry-after hint out of an error message, if present.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let caps = RETRY_AFTER_RE.captures(message)?;
    let minutes: f64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
    let total = (minutes * 60.0 + seconds).min(MAX_BACKOFF_SECS);
    Some(Duration::from_secs_f64(total))
}

/// Exponential backoff for attempt `n` (0-indexed), capped at 180s.
pub fn exponential_backoff(attempt: u32) -> Duration {
    let secs = 2f64.powi(attempt as i32).min(MAX_BACKOFF_SECS);
    Duration::from_secs_f64(secs)
}

pub fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minutes_and_seconds() {
        assert_eq!(parse_retry_after("please retry in 1m30s"), Some(Duration::from_secs_f64(90.0)));
    }

    #[test]
    fn parses_seconds_only() {
        assert_eq!(parse_retry_after("retry after 4.5s"), Some(Duration::from_secs_f64(4.5)));
    }

    #[test]
    fn caps_at_max_backoff() {
        assert_eq!(parse_retry_after("retry in 10m0s"), Some(Duration::from_secs_f64(180.0)));
    }

    #[test]
    fn no_hint_returns_none() {
        assert_eq!(parse_retry_after("internal server error"), None);
    }

    #[test]
    fn detects_rate_limit_phrasing() {
        assert!(looks_rate_limited("HTTP 429 Too Many Requests"));
        assert!(looks_rate_limited("You have hit the rate limit"));
        assert!(!looks_rate_limited("invalid api key"));
    }
}
