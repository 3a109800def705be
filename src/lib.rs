//! ratekeeper - rate-limit aware request manager for throttled HTTP APIs.
//!
//! Every outbound call goes through a [`RateLimitManager`]: a bounded priority
//! queue drained by a fixed pool of workers that read the remote service's
//! `RateLimit-*` and cache headers, throttle before quota runs out, retry
//! transient failures and reuse responses that are still fresh.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http_client;
pub mod manager;
pub mod queue;
pub mod rate_limit;

pub use cache::{InMemoryResponseCache, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EndpointOverrides, EndpointRoute, EndpointSettings, ManagerConfig};
pub use error::{BuildError, ConfigError, RequestError, TransportError};
pub use http_client::{HttpResponse, ReqwestTransport, RequestDescriptor, Transport};
pub use manager::{EndpointStatus, ManagerBuilder, QueueStatus, RateLimitManager, StatusSummary};
pub use queue::{ResultHandle, RequestQueue};
pub use rate_limit::{AttemptOutcome, EndpointKey, RateLimitSnapshot};
