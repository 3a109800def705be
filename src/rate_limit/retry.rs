//! Retry policy: what to do after an attempt.

use std::time::Duration;

use reqwest::StatusCode;

use super::headers::HeaderDelta;
use crate::error::TransportError;
use crate::http_client::HttpResponse;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Status and description of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    pub status: Option<u16>,
    pub message: String,
}

impl FailureDetail {
    fn from_status(status: StatusCode) -> Self {
        Self {
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status),
        }
    }
}

/// Result of one network attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(HttpResponse),
    /// 429; the remote asked us to come back after this long.
    RateLimited(Duration),
    /// Network error, 408 or 5xx.
    TransientFailure(FailureDetail),
    /// Any other 4xx, or a request that cannot be sent.
    PermanentFailure(FailureDetail),
}

impl AttemptOutcome {
    /// Classify a transport result. For 429 the wait comes from
    /// `RateLimit-Reset`, then `Retry-After`, then `fallback`.
    pub fn classify(
        result: Result<HttpResponse, TransportError>,
        delta: &HeaderDelta,
        fallback: Duration,
    ) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let detail = FailureDetail {
                    status: None,
                    message: e.to_string(),
                };
                return if e.is_transient() {
                    AttemptOutcome::TransientFailure(detail)
                } else {
                    AttemptOutcome::PermanentFailure(detail)
                };
            }
        };

        let status = response.status;
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = delta.reset_after.or(delta.retry_after).unwrap_or(fallback);
            AttemptOutcome::RateLimited(wait)
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            AttemptOutcome::TransientFailure(FailureDetail::from_status(status))
        } else if status.is_client_error() {
            AttemptOutcome::PermanentFailure(FailureDetail::from_status(status))
        } else {
            AttemptOutcome::Success(response)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::RateLimited(_) => "rate_limited",
            AttemptOutcome::TransientFailure(_) => "transient_failure",
            AttemptOutcome::PermanentFailure(_) => "permanent_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on top of the first attempt.
    pub max_retries: u32,
    /// Base of the exponential backoff.
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    /// `attempt` is the zero-based index of the attempt that produced `outcome`.
    pub fn decide(&self, outcome: &AttemptOutcome, attempt: u32) -> RetryDecision {
        match outcome {
            AttemptOutcome::Success(_) | AttemptOutcome::PermanentFailure(_) => RetryDecision::Stop,
            AttemptOutcome::RateLimited(retry_after) if attempt < self.max_retries => {
                RetryDecision::RetryAfter(*retry_after)
            }
            AttemptOutcome::TransientFailure(_) if attempt < self.max_retries => {
                RetryDecision::RetryAfter(backoff_delay(attempt, self.base))
            }
            _ => RetryDecision::Stop,
        }
    }
}

/// `base * (2^attempt + 0.1 * attempt)`: 1s, 2.1s, 4.2s for a 1s base.
/// The small linear term keeps concurrent retries from lining up.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2f64.powi(attempt.min(30) as i32) + 0.1 * attempt as f64;
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            Vec::new(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    fn approx(actual: Duration, expected_secs: f64) -> bool {
        (actual.as_secs_f64() - expected_secs).abs() < 1e-6
    }

    #[test]
    fn test_backoff_sequence() {
        let base = Duration::from_secs(1);
        assert!(approx(backoff_delay(0, base), 1.0));
        assert!(approx(backoff_delay(1, base), 2.1));
        assert!(approx(backoff_delay(2, base), 4.2));
        assert_eq!(backoff_delay(20, base), MAX_BACKOFF);
    }

    #[test]
    fn test_transient_retries_until_budget_spent() {
        let outcome = AttemptOutcome::TransientFailure(FailureDetail {
            status: Some(503),
            message: "HTTP 503".into(),
        });
        let p = policy();
        assert!(matches!(p.decide(&outcome, 0), RetryDecision::RetryAfter(d) if approx(d, 1.0)));
        assert!(matches!(p.decide(&outcome, 1), RetryDecision::RetryAfter(d) if approx(d, 2.1)));
        assert!(matches!(p.decide(&outcome, 2), RetryDecision::RetryAfter(d) if approx(d, 4.2)));
        assert_eq!(p.decide(&outcome, 3), RetryDecision::Stop);
    }

    #[test]
    fn test_rate_limited_waits_for_reset() {
        let outcome = AttemptOutcome::RateLimited(Duration::from_secs(3));
        assert_eq!(
            policy().decide(&outcome, 0),
            RetryDecision::RetryAfter(Duration::from_secs(3))
        );
        assert_eq!(policy().decide(&outcome, 3), RetryDecision::Stop);
    }

    #[test]
    fn test_permanent_and_success_stop() {
        let denied = AttemptOutcome::PermanentFailure(FailureDetail {
            status: Some(404),
            message: "HTTP 404".into(),
        });
        assert_eq!(policy().decide(&denied, 0), RetryDecision::Stop);
        assert_eq!(
            policy().decide(&AttemptOutcome::Success(response(200)), 0),
            RetryDecision::Stop
        );
    }

    #[test]
    fn test_classify_statuses() {
        let delta = HeaderDelta::default();
        let fallback = Duration::from_secs(5);

        assert!(matches!(
            AttemptOutcome::classify(Ok(response(200)), &delta, fallback),
            AttemptOutcome::Success(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(response(304)), &delta, fallback),
            AttemptOutcome::Success(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(response(502)), &delta, fallback),
            AttemptOutcome::TransientFailure(FailureDetail { status: Some(502), .. })
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(response(404)), &delta, fallback),
            AttemptOutcome::PermanentFailure(FailureDetail { status: Some(404), .. })
        ));
        assert!(matches!(
            AttemptOutcome::classify(Err(TransportError::Timeout("30s".into())), &delta, fallback),
            AttemptOutcome::TransientFailure(FailureDetail { status: None, .. })
        ));
        assert!(matches!(
            AttemptOutcome::classify(
                Err(TransportError::InvalidRequest("bad url".into())),
                &delta,
                fallback
            ),
            AttemptOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn test_classify_429_wait_sources() {
        let fallback = Duration::from_secs(5);

        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-reset", HeaderValue::from_static("3"));
        headers.insert("retry-after", HeaderValue::from_static("9"));
        let delta = super::super::headers::interpret(&headers, chrono::Utc::now());
        assert!(matches!(
            AttemptOutcome::classify(Ok(response(429)), &delta, fallback),
            AttemptOutcome::RateLimited(d) if d == Duration::from_secs(3)
        ));

        let retry_only = HeaderDelta {
            retry_after: Some(Duration::from_secs(9)),
            ..Default::default()
        };
        assert!(matches!(
            AttemptOutcome::classify(Ok(response(429)), &retry_only, fallback),
            AttemptOutcome::RateLimited(d) if d == Duration::from_secs(9)
        ));

        assert!(matches!(
            AttemptOutcome::classify(Ok(response(429)), &HeaderDelta::default(), fallback),
            AttemptOutcome::RateLimited(d) if d == fallback
        ));
    }
}
