//! Error types.

use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::EndpointKey;

/// Final failure of a managed request, as observed by the caller.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Rejected at enqueue time; the request was never attempted.
    #[error("Request queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },
    /// Still rate limited after every retry.
    #[error("Rate limited by {endpoint} after {attempts} attempts (retry after {retry_after:?})")]
    RateLimited {
        endpoint: EndpointKey,
        attempts: u32,
        retry_after: Duration,
    },
    /// Network error or 5xx that did not clear up within the retry budget.
    #[error("Request to {endpoint} failed after {attempts} attempts: {message}")]
    Transient {
        endpoint: EndpointKey,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },
    /// 4xx (other than 429) or a malformed request. Never retried.
    #[error("Request to {endpoint} rejected: {message}")]
    Permanent {
        endpoint: EndpointKey,
        status: Option<u16>,
        message: String,
    },
    /// The manager no longer accepts work.
    #[error("Request manager is shutting down")]
    ShuttingDown,
    /// The worker holding the request went away without resolving it.
    #[error("Request was dropped before completion")]
    Dropped,
}

impl RequestError {
    /// HTTP status of the last response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::RateLimited { .. } => Some(429),
            RequestError::Transient { status, .. } | RequestError::Permanent { status, .. } => {
                *status
            }
            _ => None,
        }
    }

    /// Whether the failure happened before any network call.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            RequestError::QueueFull { .. } | RequestError::ShuttingDown
        )
    }
}

/// Network-level failure reported by a [`Transport`](crate::http_client::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Failed to read response body: {0}")]
    Body(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Failure to construct a manager.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_failures() {
        let endpoint = EndpointKey::new("wynncraft_player_api");
        let limited = RequestError::RateLimited {
            endpoint: endpoint.clone(),
            attempts: 4,
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(limited.status(), Some(429));

        let denied = RequestError::Permanent {
            endpoint,
            status: Some(404),
            message: "Not Found".to_string(),
        };
        assert_eq!(denied.status(), Some(404));
        assert!(!denied.is_rejected());
        assert!(RequestError::QueueFull { capacity: 10 }.is_rejected());
    }

    #[test]
    fn test_invalid_request_is_not_transient() {
        assert!(!TransportError::InvalidRequest("bad url".into()).is_transient());
        assert!(TransportError::Timeout("30s".into()).is_transient());
        assert!(TransportError::Connect("refused".into()).is_transient());
    }
}
