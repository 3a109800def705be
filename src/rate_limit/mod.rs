//! Rate limiting infrastructure for outbound API requests.
//!
//! - [`headers`]: reads `RateLimit-*`, cache and `Date` headers
//! - [`endpoint`]: per-endpoint quota state shared by all workers
//! - [`throttle`]: delay before the next dispatch
//! - [`retry`]: what to do after a failed attempt

pub mod endpoint;
pub mod headers;
pub mod retry;
pub mod throttle;

pub use endpoint::{EndpointKey, EndpointTable, RateLimitSnapshot};
pub use headers::{interpret, HeaderDelta, SkippedHeader};
pub use retry::{backoff_delay, AttemptOutcome, FailureDetail, RetryDecision, RetryPolicy};
pub use throttle::ThrottleDecision;
