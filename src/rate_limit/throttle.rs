//! Proactive throttling: how long to wait before the next dispatch.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::endpoint::RateLimitSnapshot;
use crate::config::EndpointSettings;

/// Below 10% of the limit remaining.
const CRITICAL_RATIO: f64 = 0.10;
const CRITICAL_DELAY: Duration = Duration::from_secs(2);
/// Below 20% of the limit remaining.
const LOW_RATIO: f64 = 0.20;
const LOW_DELAY: Duration = Duration::from_secs(1);
/// Below the absolute threshold.
const THRESHOLD_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Soft throttle: wait this long, then dispatch.
    Wait(Duration),
    /// Quota is exhausted: nothing may be sent before this instant.
    BlockedUntil(DateTime<Utc>),
}

impl ThrottleDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ThrottleDecision::BlockedUntil(_))
    }

    /// Time to suspend, measured from `now`.
    pub fn delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            ThrottleDecision::Wait(delay) => *delay,
            ThrottleDecision::BlockedUntil(until) => {
                (*until - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Map the freshest snapshot to a delay.
pub fn decide(
    snapshot: &RateLimitSnapshot,
    settings: &EndpointSettings,
    now: DateTime<Utc>,
) -> ThrottleDecision {
    if snapshot.is_rate_limited(now) {
        if let Some(reset_at) = snapshot.reset_at {
            return ThrottleDecision::BlockedUntil(reset_at);
        }
    }

    let remaining = match snapshot.effective_remaining(now) {
        Some(remaining) => remaining,
        None => return ThrottleDecision::Wait(settings.default_delay),
    };

    if let Some(limit) = snapshot.limit.filter(|l| *l > 0) {
        let ratio = remaining as f64 / limit as f64;
        if ratio < CRITICAL_RATIO {
            return ThrottleDecision::Wait(CRITICAL_DELAY);
        }
        if ratio < LOW_RATIO {
            return ThrottleDecision::Wait(LOW_DELAY);
        }
    }

    if remaining < settings.throttle_threshold {
        return ThrottleDecision::Wait(THRESHOLD_DELAY);
    }

    ThrottleDecision::Wait(settings.default_delay)
}
