//! Facade behaviour driven through the public API with a scripted transport
//! and virtual time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use ratekeeper::{
    Clock, EndpointKey, HttpResponse, ManagerConfig, ManualClock, RateLimitManager,
    RequestDescriptor, RequestError, Transport, TransportError,
};

/// Replies with the same headers every time, after taking a permit from `gate`.
struct FixedTransport {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl FixedTransport {
    fn new(status: u16, headers: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            status,
            headers,
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn gated(mut self) -> Self {
        self.gate = Arc::new(Semaphore::new(0));
        self
    }
}

#[async_trait]
impl Transport for FixedTransport {
    async fn send(&self, _request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
        self.gate.acquire().await.unwrap().forget();
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut headers = HeaderMap::new();
        for &(name, value) in &self.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        Ok(HttpResponse::new(
            StatusCode::from_u16(self.status).unwrap(),
            headers,
            b"{}".to_vec(),
        ))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn exhausted_quota_delays_next_dispatch_until_reset() {
    let transport = FixedTransport::new(
        200,
        vec![
            ("date", "Sat, 01 Jun 2024 12:00:00 GMT"),
            ("ratelimit-limit", "60"),
            ("ratelimit-remaining", "0"),
            ("ratelimit-reset", "45"),
        ],
    );
    let calls = transport.calls.clone();
    let clock = ManualClock::new(t0());
    let manager = RateLimitManager::builder(ManagerConfig::default())
        .transport(transport)
        .clock(clock.clone())
        .build()
        .unwrap();

    let url = "https://api.wynncraft.com/v3/player/Salted";
    manager.get(url).await.unwrap();
    let summary = manager.get_status_summary().await;
    assert!(summary.endpoints["wynncraft_player_api"].is_rate_limited);

    manager.get(url).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(clock.now() >= t0() + chrono::Duration::seconds(45));
    assert!(clock.sleeps().iter().any(|s| *s > Duration::from_secs(40)));

    manager.shutdown().await;
}

#[tokio::test]
async fn concurrent_enqueues_beyond_capacity_are_rejected() {
    let transport = FixedTransport::new(200, Vec::new()).gated();
    let gate = transport.gate.clone();
    let calls = transport.calls.clone();
    let config = ManagerConfig {
        max_queue_size: 5,
        queue_workers: 1,
        ..Default::default()
    };
    let manager = Arc::new(
        RateLimitManager::builder(config)
            .transport(transport)
            .clock(ManualClock::new(t0()))
            .build()
            .unwrap(),
    );

    // Occupy the only worker.
    let first = manager
        .queue_request(RequestDescriptor::get("https://example.com/first"), "example.com_api", 0)
        .await
        .unwrap();
    while !manager.get_status_summary().await.queue.is_empty {
        tokio::task::yield_now().await;
    }

    let attempts: Vec<_> = (0..20)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .queue_request(
                        RequestDescriptor::get(format!("https://example.com/{}", i)),
                        "example.com_api",
                        0,
                    )
                    .await
            })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(handle) => accepted.push(handle),
            Err(RequestError::QueueFull { capacity }) => {
                assert_eq!(capacity, 5);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(accepted.len(), 5);
    assert_eq!(rejected, 15);

    gate.add_permits(100);
    first.await.unwrap();
    for handle in accepted {
        handle.await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    match Arc::try_unwrap(manager) {
        Ok(manager) => manager.shutdown().await,
        Err(_) => panic!("manager still shared"),
    }
}

#[tokio::test]
async fn unauthorized_is_surfaced_without_retry() {
    let transport = FixedTransport::new(401, Vec::new());
    let calls = transport.calls.clone();
    let manager = RateLimitManager::builder(ManagerConfig::default())
        .transport(transport)
        .clock(ManualClock::new(t0()))
        .build()
        .unwrap();

    let err = manager
        .make_request(
            RequestDescriptor::get("https://api.wynncraft.com/v3/guild/Salted"),
            EndpointKey::new("wynncraft_api_v3"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(matches!(err, RequestError::Permanent { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_queued_requests() {
    let transport = FixedTransport::new(200, Vec::new());
    let calls = transport.calls.clone();
    let manager = RateLimitManager::builder(ManagerConfig::default())
        .transport(transport)
        .clock(ManualClock::new(t0()))
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(
            manager
                .queue_request(
                    RequestDescriptor::get(format!("https://nori.fish/api/item/{}", i)),
                    "nori_fish_api",
                    i % 3,
                )
                .await
                .unwrap(),
        );
    }
    manager.shutdown().await;

    for mut handle in handles {
        assert!(matches!(handle.try_result(), Some(Ok(_))));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn oversized_headers_leave_the_pool_serving() {
    let transport = FixedTransport::new(
        200,
        vec![
            ("ratelimit-reset", "1e20"),
            ("cache-control", "max-age=100000000000000"),
        ],
    );
    let calls = transport.calls.clone();
    let config = ManagerConfig {
        queue_workers: 1,
        ..Default::default()
    };
    let manager = RateLimitManager::builder(config)
        .transport(transport)
        .clock(ManualClock::new(t0()))
        .build()
        .unwrap();

    let url = "https://api.wynncraft.com/v3/player/Salted";
    let first = manager.get(url).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), manager.get(url))
        .await
        .expect("the only worker stopped serving")
        .unwrap();
    assert!(!first.from_cache);
    assert!(!second.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let summary = manager.get_status_summary().await;
    assert!(!summary.endpoints["wynncraft_player_api"].cache_valid);

    manager.shutdown().await;
}
