//! HTTP response wrapper.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// A fully read HTTP response. Cloneable so it can be served from cache.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Served from the response cache instead of the network.
    pub from_cache: bool,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            from_cache: false,
        }
    }

    /// Read status, headers and body out of a reqwest response.
    pub async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self::new(status, headers, body))
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response is 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Get a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get response body as text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Copy marked as a cache hit.
    pub(crate) fn cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Player {
        username: String,
        online: bool,
    }

    #[test]
    fn test_json_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let response = HttpResponse::new(
            StatusCode::OK,
            headers,
            br#"{"username":"Salted","online":true}"#.to_vec(),
        );

        assert!(response.is_success());
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(
            response.json::<Player>().unwrap(),
            Player {
                username: "Salted".to_string(),
                online: true
            }
        );
    }

    #[test]
    fn test_cached_copy_is_flagged() {
        let response = HttpResponse::new(StatusCode::OK, HeaderMap::new(), b"hi".to_vec());
        let cached = response.cached();
        assert!(cached.from_cache);
        assert!(!response.from_cache);
        assert_eq!(cached.text(), "hi");
    }
}
