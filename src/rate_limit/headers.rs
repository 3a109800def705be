//! Rate limit and cache header interpretation.
//!
//! Turns a response's header map into a [`HeaderDelta`]: only the fields whose
//! headers were present and well-formed are set. Absolute instants are
//! anchored on the response's own `Date` header rather than the local clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

pub const RATE_LIMIT_LIMIT: &str = "ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "ratelimit-reset";
pub const RETRY_AFTER: &str = "retry-after";
pub const CACHE_CONTROL: &str = "cache-control";
pub const EXPIRES: &str = "expires";
pub const DATE: &str = "date";
pub const VERSION: &str = "version";

/// A header that was present but could not be understood. Its field is omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedHeader {
    pub name: &'static str,
    pub value: String,
}

/// Rate limit and cache facts carried by one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderDelta {
    /// Reference instant: the `Date` header, or the local receipt time.
    pub date: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Relative `RateLimit-Reset` value.
    pub reset_after: Option<Duration>,
    /// `date + reset_after`.
    pub reset_at: Option<DateTime<Utc>>,
    /// `Retry-After`, as seconds or an HTTP date relative to `date`.
    pub retry_after: Option<Duration>,
    pub cache_valid_until: Option<DateTime<Utc>>,
    pub api_version: Option<String>,
    pub skipped: Vec<SkippedHeader>,
}

impl HeaderDelta {
    /// Whether any rate limit field was observed.
    pub fn has_rate_limit_info(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset_at.is_some()
    }

    fn skip(&mut self, name: &'static str, value: &str) {
        self.skipped.push(SkippedHeader {
            name,
            value: value.to_string(),
        });
    }
}

/// Interpret `headers`. `received_at` is only used when `Date` is missing or
/// malformed. Never fails; problems end up in [`HeaderDelta::skipped`].
pub fn interpret(headers: &HeaderMap, received_at: DateTime<Utc>) -> HeaderDelta {
    let mut delta = HeaderDelta::default();

    let date = match header_str(headers, DATE) {
        Some(value) => match parse_http_date(value) {
            Some(date) => Some(date),
            None => {
                delta.skip(DATE, value);
                None
            }
        },
        None => None,
    };
    let reference = date.unwrap_or(received_at);
    delta.date = Some(reference);

    delta.limit = parse_count(headers, RATE_LIMIT_LIMIT, &mut delta.skipped);
    delta.remaining = parse_count(headers, RATE_LIMIT_REMAINING, &mut delta.skipped);

    if let Some(value) = header_str(headers, RATE_LIMIT_RESET) {
        match parse_seconds(value).and_then(|after| Some((after, offset(reference, after)?))) {
            Some((after, at)) => {
                delta.reset_after = Some(after);
                delta.reset_at = Some(at);
            }
            None => delta.skip(RATE_LIMIT_RESET, value),
        }
    }

    if let Some(value) = header_str(headers, RETRY_AFTER) {
        let parsed = parse_seconds(value)
            .filter(|after| offset(reference, *after).is_some())
            .or_else(|| {
                parse_http_date(value)
                    .map(|at| (at - reference).to_std().unwrap_or(Duration::ZERO))
            });
        match parsed {
            Some(after) => delta.retry_after = Some(after),
            None => delta.skip(RETRY_AFTER, value),
        }
    }

    match header_str(headers, CACHE_CONTROL) {
        Some(value) => match parse_max_age(value) {
            Ok(Some(max_age)) => match offset(reference, max_age) {
                Some(until) => delta.cache_valid_until = Some(until),
                None => delta.skip(CACHE_CONTROL, value),
            },
            Ok(None) => {}
            Err(()) => delta.skip(CACHE_CONTROL, value),
        },
        None => {
            if let Some(value) = header_str(headers, EXPIRES) {
                match parse_http_date(value) {
                    Some(expires) => delta.cache_valid_until = Some(expires),
                    None => delta.skip(EXPIRES, value),
                }
            }
        }
    }

    delta.api_version = header_str(headers, VERSION)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    delta
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_count(
    headers: &HeaderMap,
    name: &'static str,
    skipped: &mut Vec<SkippedHeader>,
) -> Option<u32> {
    let value = headers.get(name)?;
    let parsed = value.to_str().ok().and_then(|s| s.trim().parse::<u32>().ok());
    if parsed.is_none() {
        skipped.push(SkippedHeader {
            name,
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        });
    }
    parsed
}

/// Non-negative seconds, integral or fractional.
fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// `Ok(Some)` for `max-age=N`, `Ok(None)` when the response is not cacheable
/// (`no-store`, `no-cache`, or no `max-age`), `Err` for a malformed `max-age`.
fn parse_max_age(value: &str) -> Result<Option<Duration>, ()> {
    let mut max_age = None;
    for directive in value.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        if directive == "no-store" || directive == "no-cache" {
            return Ok(None);
        }
        if let Some(secs) = directive.strip_prefix("max-age=") {
            let secs = secs.trim_matches('"').parse::<u64>().map_err(|_| ())?;
            max_age = Some(Duration::from_secs(secs));
        }
    }
    Ok(max_age)
}

/// HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// `reference + after`, or `None` when that instant is not representable.
fn offset(reference: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    let after = chrono::Duration::from_std(after).ok()?;
    reference.checked_add_signed(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.insert(name, HeaderValue::from_static(value));
        }
        map
    }

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 5).unwrap()
    }

    #[test]
    fn test_parses_rate_limit_headers() {
        let map = headers(&[
            ("RateLimit-Limit", "120"),
            ("RateLimit-Remaining", "100"),
            ("RateLimit-Reset", "45"),
            ("Cache-Control", "public, max-age=300"),
            ("Version", "v3.3"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        let delta = interpret(&map, received());
        let date = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(delta.date, Some(date));
        assert_eq!(delta.limit, Some(120));
        assert_eq!(delta.remaining, Some(100));
        assert_eq!(delta.reset_after, Some(Duration::from_secs(45)));
        assert_eq!(delta.reset_at, Some(date + chrono::Duration::seconds(45)));
        assert_eq!(
            delta.cache_valid_until,
            Some(date + chrono::Duration::seconds(300))
        );
        assert_eq!(delta.api_version.as_deref(), Some("v3.3"));
        assert!(delta.skipped.is_empty());
    }

    #[test]
    fn test_reset_anchors_on_date_not_receipt() {
        let map = headers(&[
            ("RateLimit-Reset", "10"),
            ("Date", "Sat, 01 Jun 2024 11:59:00 GMT"),
        ]);
        let delta = interpret(&map, received());
        assert_eq!(
            delta.reset_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 11, 59, 10).unwrap())
        );
    }

    #[test]
    fn test_missing_date_falls_back_to_receipt() {
        let map = headers(&[("RateLimit-Reset", "10")]);
        let delta = interpret(&map, received());
        assert_eq!(delta.date, Some(received()));
        assert_eq!(delta.reset_at, Some(received() + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_malformed_numbers_are_absent_not_zero() {
        let map = headers(&[
            ("RateLimit-Limit", "lots"),
            ("RateLimit-Remaining", "-1"),
            ("RateLimit-Reset", "soon"),
        ]);
        let delta = interpret(&map, received());
        assert_eq!(delta.limit, None);
        assert_eq!(delta.remaining, None);
        assert_eq!(delta.reset_at, None);
        assert!(!delta.has_rate_limit_info());
        let names: Vec<_> = delta.skipped.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET]);
    }

    #[test]
    fn test_expires_used_only_without_cache_control() {
        let expires_only = headers(&[("Expires", "Sat, 01 Jun 2024 13:00:00 GMT")]);
        let delta = interpret(&expires_only, received());
        assert_eq!(
            delta.cache_valid_until,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap())
        );

        let both = headers(&[
            ("Expires", "Sat, 01 Jun 2024 13:00:00 GMT"),
            ("Cache-Control", "max-age=60"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        let delta = interpret(&both, received());
        assert_eq!(
            delta.cache_valid_until,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_no_store_is_not_cacheable() {
        let map = headers(&[
            ("Cache-Control", "no-store, max-age=60"),
            ("Expires", "Sat, 01 Jun 2024 13:00:00 GMT"),
        ]);
        assert_eq!(interpret(&map, received()).cache_valid_until, None);
    }

    #[test]
    fn test_retry_after_seconds_and_date() {
        let secs = headers(&[("Retry-After", "7")]);
        assert_eq!(
            interpret(&secs, received()).retry_after,
            Some(Duration::from_secs(7))
        );

        let date = headers(&[
            ("Retry-After", "Sat, 01 Jun 2024 12:00:30 GMT"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        assert_eq!(
            interpret(&date, received()).retry_after,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_oversized_reset_is_skipped() {
        let map = headers(&[
            ("RateLimit-Remaining", "3"),
            ("RateLimit-Reset", "1e20"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        let delta = interpret(&map, received());
        assert_eq!(delta.remaining, Some(3));
        assert_eq!(delta.reset_after, None);
        assert_eq!(delta.reset_at, None);
        let names: Vec<_> = delta.skipped.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![RATE_LIMIT_RESET]);

        // Fits in a Duration but not in a DateTime.
        let far = headers(&[("RateLimit-Reset", "18000000000000000000")]);
        let delta = interpret(&far, received());
        assert_eq!(delta.reset_at, None);
        assert_eq!(delta.skipped.len(), 1);
    }

    #[test]
    fn test_oversized_max_age_is_skipped() {
        let map = headers(&[
            ("Cache-Control", "max-age=100000000000000"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        let delta = interpret(&map, received());
        assert_eq!(delta.cache_valid_until, None);
        let names: Vec<_> = delta.skipped.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![CACHE_CONTROL]);
    }

    #[test]
    fn test_oversized_retry_after_is_skipped() {
        let map = headers(&[("Retry-After", "1e300")]);
        let delta = interpret(&map, received());
        assert_eq!(delta.retry_after, None);
        assert_eq!(delta.skipped.len(), 1);
    }

    #[test]
    fn test_interpretation_is_idempotent() {
        let map = headers(&[
            ("RateLimit-Limit", "120"),
            ("RateLimit-Remaining", "7"),
            ("RateLimit-Reset", "30"),
            ("Cache-Control", "max-age=60"),
            ("Date", "Sat, 01 Jun 2024 12:00:00 GMT"),
        ]);
        assert_eq!(interpret(&map, received()), interpret(&map, received()));
    }
}
