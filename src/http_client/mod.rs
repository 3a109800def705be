//! HTTP transport used by the worker pool.
//!
//! Workers only see the [`Transport`] trait; [`ReqwestTransport`] is the
//! production implementation and tests substitute scripted ones.

mod response;

pub use response::HttpResponse;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use crate::config::ManagerConfig;
use crate::error::{BuildError, TransportError};

/// What to send. Opaque to the rate limiting logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Key under which a response to this request is cached.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Performs one network call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the configured user agent and timeout.
    pub fn new(config: &ManagerConfig) -> Result<Self, BuildError> {
        Self::with_timeout(&config.user_agent, config.request_timeout)
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self, BuildError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let response = HttpResponse::read(response).await?;
        debug!(
            "{} {} -> {} in {:?} ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            start.elapsed(),
            response.body.len()
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_includes_method() {
        let get = RequestDescriptor::get("https://api.wynncraft.com/v3/player/Salted");
        let post = RequestDescriptor::new(Method::POST, "https://api.wynncraft.com/v3/player/Salted");
        assert_eq!(get.cache_key(), "GET https://api.wynncraft.com/v3/player/Salted");
        assert_ne!(get.cache_key(), post.cache_key());
    }

    #[tokio::test]
    async fn test_invalid_url_is_invalid_request() {
        let transport = ReqwestTransport::new(&ManagerConfig::default()).unwrap();
        let result = transport.send(&RequestDescriptor::get("not a url")).await;
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }
}
