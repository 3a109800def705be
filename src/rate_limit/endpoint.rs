//! Per-endpoint rate limiting state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::headers::HeaderDelta;
use super::throttle::{self, ThrottleDecision};
use crate::config::{EndpointRoute, EndpointSettings};

/// A logical class of remote resource with its own quota (not a single URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group a URL into an endpoint class.
    ///
    /// The first route whose prefix matches the URL (scheme and query
    /// stripped) wins; otherwise the host names the endpoint.
    pub fn for_url(url: &str, routes: &[EndpointRoute]) -> Self {
        let base = url.split(['?', '#']).next().unwrap_or(url);
        let bare = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(base);

        if let Some(route) = routes.iter().find(|r| bare.starts_with(&r.prefix)) {
            return Self::new(route.key.clone());
        }

        match Url::parse(base).ok().and_then(|u| u.host_str().map(str::to_string)) {
            Some(host) => Self(format!("{}_api", host)),
            None => Self::new("unknown_api"),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EndpointKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// What is known about one endpoint's quota and cache window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSnapshot {
    /// Max requests per reset cycle, when ever observed.
    pub limit: Option<u32>,
    /// Decremented locally per dispatch, corrected from headers.
    pub remaining: Option<u32>,
    /// When `remaining` goes back to `limit`.
    pub reset_at: Option<DateTime<Utc>>,
    pub cache_valid_until: Option<DateTime<Utc>>,
    pub api_version: Option<String>,
    pub last_request_at: Option<DateTime<Utc>>,
    /// `Date` of the newest observation applied so far.
    pub observed_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

impl RateLimitSnapshot {
    /// Remaining quota as of `now`: once `reset_at` has passed, the full limit.
    pub fn effective_remaining(&self, now: DateTime<Utc>) -> Option<u32> {
        match (self.reset_at, self.limit) {
            (Some(reset_at), Some(limit)) if reset_at <= now => Some(limit),
            _ => self.remaining,
        }
    }

    /// Quota exhausted and the reset is still ahead.
    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.remaining == Some(0) && self.reset_at.is_some_and(|reset_at| reset_at > now)
    }

    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        self.reset_at
            .map(|reset_at| (reset_at - now).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn should_throttle(&self, threshold: u32, now: DateTime<Utc>) -> bool {
        self.effective_remaining(now)
            .is_some_and(|remaining| remaining < threshold)
    }

    pub fn is_cache_valid(&self, now: DateTime<Utc>) -> bool {
        self.cache_valid_until.is_some_and(|until| until > now)
    }

    /// Merge a header observation. The latest values are authoritative,
    /// including a changed `limit`. Cache validity is replaced outright.
    ///
    /// Responses can come back out of order. An observation dated before
    /// the newest one already applied is ignored, and two observations with
    /// the same date keep the lower `remaining`. Returns whether the
    /// observation was applied.
    pub fn apply(&mut self, delta: &HeaderDelta) -> bool {
        let same_instant = match (delta.date, self.observed_at) {
            (Some(date), Some(seen)) if date < seen => return false,
            (Some(date), Some(seen)) => date == seen,
            _ => false,
        };
        if delta.date.is_some() {
            self.observed_at = delta.date;
        }

        if let Some(limit) = delta.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = delta.remaining {
            self.remaining = match self.remaining {
                Some(current) if same_instant => Some(current.min(remaining)),
                _ => Some(remaining),
            };
        }
        if let Some(reset_at) = delta.reset_at {
            self.reset_at = Some(reset_at);
        }
        self.cache_valid_until = delta.cache_valid_until;
        if let Some(ref version) = delta.api_version {
            self.api_version = Some(version.clone());
        }
        true
    }

    /// Account for one request leaving for the network at `now`.
    pub fn record_dispatch(&mut self, now: DateTime<Utc>) {
        if let Some(reset_at) = self.reset_at {
            if reset_at <= now {
                // Cycle rolled over.
                if self.limit.is_some() {
                    self.remaining = self.limit;
                }
                self.reset_at = None;
            }
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        self.last_request_at = Some(now);
        self.total_requests += 1;
    }
}

/// Shared table of endpoint state. All mutation happens under the write
/// lock as one read-modify-write, so concurrent workers never lose updates.
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    endpoints: Arc<RwLock<HashMap<EndpointKey, RateLimitSnapshot>>>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state for `key`.
    pub async fn snapshot(&self, key: &EndpointKey) -> Option<RateLimitSnapshot> {
        let endpoints = self.endpoints.read().await;
        endpoints.get(key).cloned()
    }

    /// Decide how long to wait before the next dispatch to `key`.
    ///
    /// When not blocked, the dispatch is recorded in the same critical
    /// section so concurrent workers each see the slot the others took.
    pub async fn reserve(
        &self,
        key: &EndpointKey,
        settings: &EndpointSettings,
        now: DateTime<Utc>,
    ) -> ThrottleDecision {
        let mut endpoints = self.endpoints.write().await;
        let state = endpoints.entry(key.clone()).or_default();
        let decision = throttle::decide(state, settings, now);
        if !decision.is_blocked() {
            state.record_dispatch(now);
        }
        decision
    }

    /// Record a dispatch that bypasses throttling (a retry).
    pub async fn record_dispatch(&self, key: &EndpointKey, now: DateTime<Utc>) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.entry(key.clone()).or_default().record_dispatch(now);
    }

    /// Fold a response's headers into the state for `key`.
    pub async fn observe(
        &self,
        key: &EndpointKey,
        delta: &HeaderDelta,
        settings: &EndpointSettings,
        now: DateTime<Utc>,
    ) -> RateLimitSnapshot {
        for skipped in &delta.skipped {
            debug!(
                "Skipping malformed {} header from {}: {:?}",
                skipped.name, key, skipped.value
            );
        }

        let (applied, updated) = {
            let mut endpoints = self.endpoints.write().await;
            let state = endpoints.entry(key.clone()).or_default();
            let applied = state.apply(delta);
            (applied, state.clone())
        };

        if !applied {
            debug!(
                "Ignoring out of order headers from {} dated {:?}",
                key, delta.date
            );
            return updated;
        }

        if let (Some(remaining), Some(limit)) = (delta.remaining, delta.limit) {
            let percentage = if limit > 0 {
                remaining as f64 / limit as f64 * 100.0
            } else {
                0.0
            };
            info!(
                "Rate limit status for {}: {}/{} remaining ({:.1}%)",
                key, remaining, limit, percentage
            );
            if updated.should_throttle(settings.throttle_threshold, now) {
                warn!(
                    "Rate limit threshold reached for {}. Throttling enabled. Reset in {}s",
                    key,
                    updated.seconds_until_reset(now)
                );
            }
        }

        updated
    }

    /// Count a 429 against `key`.
    pub async fn record_rate_limit_hit(&self, key: &EndpointKey) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.entry(key.clone()).or_default().rate_limit_hits += 1;
    }

    pub async fn is_cache_valid(&self, key: &EndpointKey, now: DateTime<Utc>) -> bool {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(key)
            .is_some_and(|state| state.is_cache_valid(now))
    }

    /// Forget one endpoint, or every endpoint when `key` is `None`.
    pub async fn reset(&self, key: Option<&EndpointKey>) {
        let mut endpoints = self.endpoints.write().await;
        match key {
            Some(key) => {
                if endpoints.remove(key).is_some() {
                    info!("Reset rate limit info for {}", key);
                }
            }
            None => {
                endpoints.clear();
                info!("Reset all rate limit information");
            }
        }
    }

    /// Copy of every tracked endpoint.
    pub async fn all(&self) -> HashMap<EndpointKey, RateLimitSnapshot> {
        let endpoints = self.endpoints.read().await;
        endpoints.clone()
    }
}
