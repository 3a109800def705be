//! Rate limit manager: the facade callers talk to.
//!
//! Every request, including the "do it now" path, goes through the priority
//! queue and one of a fixed set of workers, so throttling and retry rules
//! apply uniformly.

mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{InMemoryResponseCache, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ManagerConfig;
use crate::error::{BuildError, RequestError};
use crate::http_client::{HttpResponse, ReqwestTransport, RequestDescriptor, Transport};
use crate::queue::{promise, PushError, QueuedRequest, RequestQueue, ResultHandle};
use crate::rate_limit::{EndpointKey, EndpointTable, RateLimitSnapshot};

use worker::WorkerContext;

/// Priority used by [`RateLimitManager::make_request`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// Read-only view of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatus {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
    pub seconds_until_reset: u64,
    pub is_rate_limited: bool,
    pub should_throttle: bool,
    pub cache_valid_until: Option<DateTime<Utc>>,
    pub cache_valid: bool,
    pub api_version: Option<String>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

impl EndpointStatus {
    fn new(snapshot: &RateLimitSnapshot, threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit: snapshot.limit,
            remaining: snapshot.remaining,
            reset_at: snapshot.reset_at,
            seconds_until_reset: snapshot.seconds_until_reset(now),
            is_rate_limited: snapshot.is_rate_limited(now),
            should_throttle: snapshot.should_throttle(threshold, now),
            cache_valid_until: snapshot.cache_valid_until,
            cache_valid: snapshot.is_cache_valid(now),
            api_version: snapshot.api_version.clone(),
            last_request_at: snapshot.last_request_at,
            total_requests: snapshot.total_requests,
            rate_limit_hits: snapshot.rate_limit_hits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub size: usize,
    pub capacity: usize,
    pub is_empty: bool,
    pub is_full: bool,
}

/// Snapshot of every tracked endpoint plus the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub endpoints: BTreeMap<String, EndpointStatus>,
    pub queue: QueueStatus,
}

/// Builder for [`RateLimitManager`]. Unset collaborators get production defaults.
pub struct ManagerBuilder {
    config: ManagerConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn ResponseCache>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ManagerBuilder {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            transport: None,
            cache: None,
            clock: None,
        }
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn cache(mut self, cache: impl ResponseCache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Share an existing cache with other parts of the application.
    pub fn shared_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate the config and start the workers. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Result<RateLimitManager, BuildError> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryResponseCache::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(RequestQueue::new(self.config.max_queue_size)),
            config: Arc::new(self.config),
            table: EndpointTable::new(),
            transport,
            cache,
            clock,
        });

        let workers = (0..ctx.config.queue_workers)
            .map(|worker_id| tokio::spawn(worker::run(worker_id, ctx.clone())))
            .collect::<Vec<_>>();

        info!(
            "Rate limit manager started with {} workers (queue capacity {})",
            workers.len(),
            ctx.queue.capacity()
        );

        Ok(RateLimitManager { ctx, workers })
    }
}

/// Mediates every outbound call to rate limited APIs.
pub struct RateLimitManager {
    ctx: Arc<WorkerContext>,
    workers: Vec<JoinHandle<()>>,
}

impl RateLimitManager {
    /// Start a manager with the default transport, cache and clock.
    pub fn new(config: ManagerConfig) -> Result<Self, BuildError> {
        ManagerBuilder::new(config).build()
    }

    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    /// Queue at the default priority and wait for the outcome.
    pub async fn make_request(
        &self,
        descriptor: RequestDescriptor,
        endpoint: impl Into<EndpointKey>,
    ) -> Result<HttpResponse, RequestError> {
        self.queue_request(descriptor, endpoint, DEFAULT_PRIORITY)
            .await?
            .await
    }

    /// GET `url` on its routed endpoint.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, RequestError> {
        let endpoint = self.endpoint_key_for(url);
        self.make_request(RequestDescriptor::get(url), endpoint)
            .await
    }

    /// Enqueue without waiting. Lower `priority` values are served first.
    ///
    /// Fails immediately with [`RequestError::QueueFull`] when at capacity.
    pub async fn queue_request(
        &self,
        descriptor: RequestDescriptor,
        endpoint: impl Into<EndpointKey>,
        priority: i32,
    ) -> Result<ResultHandle, RequestError> {
        let (completer, handle) = promise();
        let request = QueuedRequest {
            descriptor,
            endpoint: endpoint.into(),
            priority,
            enqueued_at: self.ctx.clock.now(),
            completer,
        };

        match self.ctx.queue.push(priority, request).await {
            Ok(()) => Ok(handle),
            Err(PushError::Full(request)) => {
                warn!(
                    "Request queue full, rejecting {} ({})",
                    request.descriptor.url, request.endpoint
                );
                let error = RequestError::QueueFull {
                    capacity: self.ctx.queue.capacity(),
                };
                request.completer.complete(Err(error.clone()));
                Err(error)
            }
            Err(PushError::Closed(request)) => {
                request.completer.complete(Err(RequestError::ShuttingDown));
                Err(RequestError::ShuttingDown)
            }
        }
    }

    /// Endpoint key a URL is routed to.
    pub fn endpoint_key_for(&self, url: &str) -> EndpointKey {
        EndpointKey::for_url(url, &self.ctx.config.routes)
    }

    /// Current state of one endpoint, if it has been seen.
    pub async fn snapshot(&self, endpoint: &EndpointKey) -> Option<RateLimitSnapshot> {
        self.ctx.table.snapshot(endpoint).await
    }

    pub async fn get_status_summary(&self) -> StatusSummary {
        let now = self.ctx.clock.now();
        let endpoints = self
            .ctx
            .table
            .all()
            .await
            .into_iter()
            .map(|(key, snapshot)| {
                let threshold = self.ctx.config.settings_for(&key).throttle_threshold;
                let status = EndpointStatus::new(&snapshot, threshold, now);
                (key.to_string(), status)
            })
            .collect();

        let queue = &self.ctx.queue;
        let size = queue.len().await;
        StatusSummary {
            endpoints,
            queue: QueueStatus {
                size,
                capacity: queue.capacity(),
                is_empty: size == 0,
                is_full: size >= queue.capacity(),
            },
        }
    }

    /// Forget what is known about one endpoint, or all of them.
    pub async fn reset_endpoint(&self, endpoint: Option<&EndpointKey>) {
        self.ctx.table.reset(endpoint).await;
    }

    /// Stop accepting requests, let the workers finish everything already
    /// queued, then wait for them to exit.
    pub async fn shutdown(mut self) {
        let pending = self.ctx.queue.len().await;
        info!("Shutting down rate limit manager ({} requests pending)", pending);
        self.ctx.queue.close().await;

        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
        info!("Rate limit manager stopped");
    }
}

impl Drop for RateLimitManager {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        debug!(
            "Rate limit manager dropped without shutdown, aborting {} workers",
            self.workers.len()
        );
        for worker in &self.workers {
            worker.abort();
        }
    }
}
