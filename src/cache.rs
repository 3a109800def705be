//! Response cache seam.
//!
//! The long-lived domain cache lives above the manager. Workers only need to
//! look a response up while the endpoint's cache window is open and to hand
//! fresh responses back, which is all [`ResponseCache`] covers.
//!
//! Every entry carries its own expiry, taken from the response that produced
//! it. An endpoint's window being open says nothing about an older URL's entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::http_client::HttpResponse;

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Stored response for `key`, if one is still valid at `now`.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<HttpResponse>;

    /// Store a successful response that stays valid until `valid_until`.
    async fn put(
        &self,
        key: String,
        response: HttpResponse,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    );
}

#[derive(Debug, Clone)]
struct CachedEntry {
    response: HttpResponse,
    valid_until: DateTime<Utc>,
}

impl CachedEntry {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

/// Process-local cache. Expired entries are evicted on lookup and pruned on
/// every insert.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResponseCache {
    entries: Arc<RwLock<HashMap<String, CachedEntry>>>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<HttpResponse> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_valid(now) => return Some(entry.response.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_valid(now)) {
            tracing::debug!("Evicting expired cache entry {}", key);
            entries.remove(key);
        }
        None
    }

    async fn put(
        &self,
        key: String,
        response: HttpResponse,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_valid(now));
        let entry = CachedEntry {
            response,
            valid_until,
        };
        if entry.is_valid(now) {
            entries.insert(key, entry);
        }
    }
}
