//! Worker pool: pulls queued requests and drives each one to completion.
//!
//! One dequeued item goes through
//! `Pending -> Dispatched -> {Succeeded | Retrying -> Dispatched | Failed}`
//! entirely inside the worker that claimed it. Retries never re-enter the
//! queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::config::{EndpointSettings, ManagerConfig};
use crate::error::RequestError;
use crate::http_client::{RequestDescriptor, Transport};
use crate::queue::{QueuedRequest, RequestQueue, RequestResult};
use crate::rate_limit::{
    interpret, AttemptOutcome, EndpointKey, EndpointTable, HeaderDelta, RetryDecision,
    RetryPolicy, ThrottleDecision,
};

/// Everything a worker shares with the manager and the other workers.
pub(crate) struct WorkerContext {
    pub config: Arc<ManagerConfig>,
    pub table: EndpointTable,
    pub queue: Arc<RequestQueue<QueuedRequest>>,
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<dyn ResponseCache>,
    pub clock: Arc<dyn Clock>,
}

/// Where one item stands between attempts.
#[derive(Debug)]
enum AttemptState {
    /// About to hit the network; `attempt` is zero-based.
    Dispatched { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Finished(RequestResult),
}

/// Worker loop. Exits once the queue is closed and drained.
pub(crate) async fn run(worker_id: usize, ctx: Arc<WorkerContext>) {
    debug!("Worker {} started", worker_id);

    while let Some(request) = ctx.queue.pop().await {
        let QueuedRequest {
            descriptor,
            endpoint,
            completer,
            ..
        } = request;

        let result = match AssertUnwindSafe(ctx.execute(&descriptor, &endpoint))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Worker {}: request to {} panicked, resolving it as dropped",
                    worker_id, descriptor.url
                );
                Err(RequestError::Dropped)
            }
        };

        if !completer.complete(result) {
            debug!(
                "Worker {}: result for {} discarded, handle was abandoned",
                worker_id, descriptor.url
            );
        }
    }

    debug!("Worker {} stopped", worker_id);
}

impl WorkerContext {
    /// Serve from cache, or throttle then dispatch with retries.
    pub(crate) async fn execute(
        &self,
        request: &RequestDescriptor,
        endpoint: &EndpointKey,
    ) -> RequestResult {
        let settings = self.config.settings_for(endpoint);

        if self.table.is_cache_valid(endpoint, self.clock.now()).await {
            let cached = self.cache.get(&request.cache_key(), self.clock.now()).await;
            if let Some(hit) = cached {
                debug!("Serving {} from cache ({})", request.url, endpoint);
                return Ok(hit.cached());
            }
        }

        self.throttle(endpoint, &settings).await;

        let policy = RetryPolicy::new(settings.max_retries, self.config.retry_base);
        let mut state = AttemptState::Dispatched { attempt: 0 };
        loop {
            state = match state {
                AttemptState::Dispatched { attempt } => {
                    self.attempt(request, endpoint, &settings, &policy, attempt)
                        .await
                }
                AttemptState::Retrying { attempt, delay } => {
                    self.clock.sleep(delay).await;
                    self.table.record_dispatch(endpoint, self.clock.now()).await;
                    AttemptState::Dispatched { attempt }
                }
                AttemptState::Finished(result) => return result,
            };
        }
    }

    /// Wait out hard blocks, then the soft throttle delay. The dispatch is
    /// reserved against the endpoint's quota before sleeping.
    async fn throttle(&self, endpoint: &EndpointKey, settings: &EndpointSettings) {
        loop {
            let now = self.clock.now();
            let decision = self.table.reserve(endpoint, settings, now).await;
            let delay = decision.delay(now);
            match decision {
                ThrottleDecision::BlockedUntil(reset_at) => {
                    warn!(
                        "Rate limit exhausted for {}, waiting {:.1}s until {}",
                        endpoint,
                        delay.as_secs_f64(),
                        reset_at
                    );
                    self.clock.sleep(delay).await;
                }
                ThrottleDecision::Wait(_) => {
                    self.clock.sleep(delay).await;
                    return;
                }
            }
        }
    }

    /// One network call, its header bookkeeping, and the retry verdict.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        endpoint: &EndpointKey,
        settings: &EndpointSettings,
        policy: &RetryPolicy,
        attempt: u32,
    ) -> AttemptState {
        let result = self.transport.send(request).await;
        let now = self.clock.now();

        let delta = match result {
            Ok(ref response) => {
                let delta = interpret(&response.headers, now);
                self.table.observe(endpoint, &delta, settings, now).await;
                delta
            }
            Err(_) => HeaderDelta::default(),
        };

        let outcome =
            AttemptOutcome::classify(result, &delta, self.config.rate_limited_fallback);
        if matches!(outcome, AttemptOutcome::RateLimited(_)) {
            self.table.record_rate_limit_hit(endpoint).await;
        }

        match policy.decide(&outcome, attempt) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "{} for {} ({}), attempt {}/{}, retrying in {:.1}s",
                    outcome.label(),
                    request.url,
                    endpoint,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay.as_secs_f64()
                );
                AttemptState::Retrying {
                    attempt: attempt + 1,
                    delay,
                }
            }
            RetryDecision::Stop => {
                let result = self
                    .finish(request, endpoint, outcome, attempt + 1, delta.cache_valid_until)
                    .await;
                AttemptState::Finished(result)
            }
        }
    }

    /// Map the last outcome to the caller's result. A success is cached
    /// until its own `valid_until`.
    async fn finish(
        &self,
        request: &RequestDescriptor,
        endpoint: &EndpointKey,
        outcome: AttemptOutcome,
        attempts: u32,
        valid_until: Option<DateTime<Utc>>,
    ) -> RequestResult {
        match outcome {
            AttemptOutcome::Success(response) => {
                let now = self.clock.now();
                match valid_until {
                    Some(until) if response.is_success() && until > now => {
                        self.cache
                            .put(request.cache_key(), response.clone(), until, now)
                            .await;
                    }
                    _ => {}
                }
                Ok(response)
            }
            AttemptOutcome::RateLimited(retry_after) => {
                error!(
                    "Giving up on {}: still rate limited by {} after {} attempts",
                    request.url, endpoint, attempts
                );
                Err(RequestError::RateLimited {
                    endpoint: endpoint.clone(),
                    attempts,
                    retry_after,
                })
            }
            AttemptOutcome::TransientFailure(detail) => {
                error!(
                    "Giving up on {} after {} attempts: {}",
                    request.url, attempts, detail.message
                );
                Err(RequestError::Transient {
                    endpoint: endpoint.clone(),
                    attempts,
                    status: detail.status,
                    message: detail.message,
                })
            }
            AttemptOutcome::PermanentFailure(detail) => {
                error!("Request to {} failed: {}", request.url, detail.message);
                Err(RequestError::Permanent {
                    endpoint: endpoint.clone(),
                    status: detail.status,
                    message: detail.message,
                })
            }
        }
    }
}
