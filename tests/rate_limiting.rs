//! Admission control across backends and through the HTTP middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::Router;
use chrono::Duration as ChronoDuration;
use insure_reliability::clock::ManualClock;
use insure_reliability::config::{RateLimitBackendKind, RateLimitConfig, ServiceConfig, TimeoutConfig};
use insure_reliability::security::{rate_limit_middleware, KvWindowStore, RateLimiter};
use insure_reliability::lifecycle::Shutdown;
use insure_reliability::store::InMemoryStore;
use tower::ServiceExt;

fn config(limit: u32, window_secs: u64) -> RateLimitConfig {
    RateLimitConfig {
        limit,
        window_secs,
        ..RateLimitConfig::default()
    }
}

fn shared_limiter(store: &InMemoryStore, clock: &ManualClock, limit: u32) -> RateLimiter {
    let windows = Arc::new(KvWindowStore::new(Arc::new(store.clone()), "claim-svc_rate"));
    RateLimiter::shared(windows, Arc::new(clock.clone()), &config(limit, 60), &TimeoutConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_limit_then_reject_then_slide() {
    let limiter = RateLimiter::in_memory(&config(5, 60));

    for _ in 0..5 {
        assert!(limiter.check("api:broker-1").await.is_ok());
    }
    assert!(limiter.check("api:broker-1").await.is_err());
    assert!(limiter.check("api:broker-2").await.is_ok());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(limiter.check("api:broker-1").await.is_ok());
}

#[tokio::test]
async fn test_instances_share_one_window() {
    let store = InMemoryStore::new();
    let clock = ManualClock::default();
    let a = shared_limiter(&store, &clock, 4);
    let b = shared_limiter(&store, &clock, 4);

    assert!(a.check("ip:10.0.0.7").await.is_ok());
    assert!(b.check("ip:10.0.0.7").await.is_ok());
    assert!(a.check("ip:10.0.0.7").await.is_ok());
    assert!(b.check("ip:10.0.0.7").await.is_ok());
    assert!(a.check("ip:10.0.0.7").await.is_err());
    assert!(b.check("ip:10.0.0.7").await.is_err());

    clock.advance(ChronoDuration::seconds(61));
    assert!(b.check("ip:10.0.0.7").await.is_ok());
}

#[tokio::test]
async fn test_shared_backend_outage_fails_open() {
    let store = InMemoryStore::new();
    let clock = ManualClock::default();
    let limiter = shared_limiter(&store, &clock, 1);

    assert!(limiter.check("api:broker-1").await.is_ok());
    assert!(limiter.check("api:broker-1").await.is_err());

    store.set_available(false);
    for _ in 0..10 {
        assert!(limiter.check("api:broker-1").await.is_ok());
    }

    store.set_available(true);
    assert!(limiter.check("api:broker-1").await.is_err());
}

#[tokio::test]
async fn test_configured_shared_backend_spans_instances() {
    let store = InMemoryStore::new();
    let clock = ManualClock::default();
    let service = ServiceConfig::default();
    let settings = RateLimitConfig {
        backend: RateLimitBackendKind::Shared,
        ..config(2, 60)
    };
    let instance = || {
        RateLimiter::from_config(
            &settings,
            &service,
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            &TimeoutConfig::default(),
        )
    };
    let (a, b) = (instance(), instance());

    assert!(a.check("api:broker-1").await.is_ok());
    assert!(b.check("api:broker-1").await.is_ok());
    assert!(a.check("api:broker-1").await.is_err());
    assert!(b.check("api:broker-1").await.is_err());
}

#[tokio::test]
async fn test_pruner_evicts_idle_shared_windows() {
    let store = InMemoryStore::new();
    let clock = ManualClock::default();
    let limiter = Arc::new(shared_limiter(&store, &clock, 5));
    for broker in 0..3 {
        assert!(limiter.check(&format!("api:broker-{broker}")).await.is_ok());
    }
    assert_eq!(store.len("claim-svc_rate").await, 3);

    clock.advance(ChronoDuration::seconds(61));
    let shutdown = Shutdown::new();
    let pruner = tokio::spawn(Arc::clone(&limiter).run_pruner(Duration::from_secs(30), shutdown.subscribe()));

    let mut waited = 0;
    while store.len("claim-svc_rate").await > 0 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(store.len("claim-svc_rate").await, 0);

    shutdown.trigger();
    pruner.await.unwrap();
}

fn app(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/claims", post(|| async { (StatusCode::CREATED, "created") }))
        .layer(from_fn_with_state(limiter, rate_limit_middleware))
}

fn claim_request(api_key: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/claims")
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_middleware_answers_429_with_retry_after() {
    let limiter = Arc::new(RateLimiter::in_memory(&config(2, 30)));
    let app = app(limiter);

    for _ in 0..2 {
        let response = app.clone().oneshot(claim_request("broker-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.clone().oneshot(claim_request("broker-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "30");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "too_many_requests");

    let other = app.oneshot(claim_request("broker-2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let limiter = Arc::new(RateLimiter::in_memory(&RateLimitConfig {
        enabled: false,
        ..config(1, 60)
    }));
    let app = app(limiter);

    for _ in 0..5 {
        let response = app.clone().oneshot(claim_request("broker-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
