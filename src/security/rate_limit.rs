//! Sliding-window rate limiting with a fail-open shared backend.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::clock::Clock;
use crate::config::{RateLimitBackendKind, RateLimitConfig, ServiceConfig, TimeoutConfig};
use crate::observability::metrics;
use crate::resilience::timeouts::bounded;
use crate::security::window_store::{KvWindowStore, WindowStore};
use crate::store::{KeyValueStore, StoreError};

/// Shared windows deleted per prune.
const SHARED_PURGE_BATCH: usize = 500;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for {key}: {limit} requests per {window_secs}s")]
    TooManyRequests {
        key: String,
        limit: u32,
        window_secs: u64,
    },
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let RateLimitError::TooManyRequests { window_secs, .. } = &self;
        let retry_after = HeaderValue::from(*window_secs);
        let body = json!({
            "error": "too_many_requests",
            "message": self.to_string(),
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response.headers_mut().insert(header::RETRY_AFTER, retry_after);
        response
    }
}

/// Where request timestamps live.
pub enum RateLimitBackend {
    /// Per-process windows; reset on restart.
    InMemory(DashMap<String, VecDeque<Instant>>),
    /// Windows shared by every instance.
    Shared {
        windows: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    },
}

impl RateLimitBackend {
    fn name(&self) -> &'static str {
        match self {
            RateLimitBackend::InMemory(_) => "in_memory",
            RateLimitBackend::Shared { .. } => "shared",
        }
    }
}

/// Per-key sliding-window admission control.
pub struct RateLimiter {
    backend: RateLimitBackend,
    enabled: bool,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Build the backend `config.backend` names. The shared backend keeps its
    /// windows in `store` under the service's rate-limit table.
    pub fn from_config(
        config: &RateLimitConfig,
        service: &ServiceConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        let limiter = match config.backend {
            RateLimitBackendKind::InMemory => Self::in_memory(config),
            RateLimitBackendKind::Shared => {
                let windows = Arc::new(KvWindowStore::new(store, service.rate_limit_table()));
                Self::shared(windows, clock, config, timeouts)
            }
        };
        tracing::info!(
            backend = limiter.backend_name(),
            limit = config.limit,
            window_secs = config.window_secs,
            enabled = config.enabled,
            "Rate limiter configured"
        );
        limiter
    }

    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::with_backend(RateLimitBackend::InMemory(DashMap::new()), config)
    }

    pub fn shared(
        windows: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        config: &RateLimitConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        let backend = RateLimitBackend::Shared {
            windows,
            clock,
            timeout: timeouts.store(),
        };
        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: RateLimitBackend, config: &RateLimitConfig) -> Self {
        Self {
            backend,
            enabled: config.enabled,
            limit: config.limit,
            window: Duration::from_secs(config.window_secs),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Admit one request for `key` if fewer than `limit` were admitted in
    /// the trailing `window`.
    ///
    /// A shared backend that cannot be reached admits the request.
    pub async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> bool {
        match &self.backend {
            RateLimitBackend::InMemory(windows) => admit_local(windows, key, limit, window),
            RateLimitBackend::Shared {
                windows,
                clock,
                timeout,
            } => {
                let admit = windows.admit(key, clock.now_ms(), window.as_millis() as i64, limit);
                let result = bounded(*timeout, admit, || {
                    StoreError::Timeout(timeout.as_millis() as u64)
                })
                .await;

                match result {
                    Ok(admitted) => admitted,
                    Err(StoreError::Conflict { .. }) => {
                        tracing::warn!(key, "Rate window contention exhausted, rejecting");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(key, error = %e, "Rate limiter backend failed, allowing request");
                        metrics::record_rate_limiter_fail_open();
                        true
                    }
                }
            }
        }
    }

    /// Admission check with the configured limit and window.
    pub async fn check(&self, key: &str) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        if self.is_allowed(key, self.limit, self.window).await {
            return Ok(());
        }

        tracing::warn!(client = %key, limit = self.limit, "Rate limit exceeded");
        metrics::record_rate_limited(self.backend_name());
        Err(RateLimitError::TooManyRequests {
            key: key.to_string(),
            limit: self.limit,
            window_secs: self.window.as_secs(),
        })
    }

    /// Evict windows whose every timestamp expired. Returns the number of
    /// evicted keys.
    ///
    /// The shared backend deletes at most one batch per call; a failure is
    /// logged and counts as nothing evicted.
    pub async fn prune(&self) -> usize {
        match &self.backend {
            RateLimitBackend::InMemory(windows) => {
                let now = Instant::now();
                let before = windows.len();
                windows.retain(|_, stamps| {
                    drop_expired(stamps, now, self.window);
                    !stamps.is_empty()
                });
                before.saturating_sub(windows.len())
            }
            RateLimitBackend::Shared {
                windows,
                clock,
                timeout,
            } => {
                let purge = windows.purge_expired(clock.now_ms(), SHARED_PURGE_BATCH);
                match bounded(*timeout, purge, || StoreError::Timeout(timeout.as_millis() as u64)).await {
                    Ok(purged) => purged,
                    Err(e) => {
                        tracing::warn!(error = %e, "Shared rate window purge failed");
                        0
                    }
                }
            }
        }
    }

    /// Number of keys with a live in-process window.
    pub fn tracked_keys(&self) -> usize {
        match &self.backend {
            RateLimitBackend::InMemory(windows) => windows.len(),
            RateLimitBackend::Shared { .. } => 0,
        }
    }

    /// Prune every `interval` until shutdown.
    pub async fn run_pruner(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.prune().await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted idle rate windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate window pruner received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn drop_expired(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = stamps.front() {
        if now.duration_since(oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

fn admit_local(windows: &DashMap<String, VecDeque<Instant>>, key: &str, limit: u32, window: Duration) -> bool {
    let now = Instant::now();
    let mut stamps = windows.entry(key.to_string()).or_default();
    drop_expired(&mut stamps, now, window);

    if stamps.len() < limit as usize {
        stamps.push_back(now);
        true
    } else {
        false
    }
}

/// API key if present, otherwise the peer IP.
fn caller_key(request: &Request<Body>) -> String {
    if let Some(api_key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return format!("api:{api_key}");
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Middleware answering 429 once a caller exceeds its window.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = caller_key(&request);
    match limiter.check(&key).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::security::window_store::KvWindowStore;
    use crate::store::InMemoryStore;

    fn config(limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            limit,
            window_secs,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_window() {
        let limiter = RateLimiter::in_memory(&config(3, 10));

        for _ in 0..3 {
            assert!(limiter.check("client").await.is_ok());
        }
        assert!(limiter.check("client").await.is_err());
        assert!(limiter.check("other").await.is_ok());

        time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check("client").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_past_oldest() {
        let limiter = RateLimiter::in_memory(&config(2, 10));

        assert!(limiter.check("client").await.is_ok());
        time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_err());

        // First stamp expires at t=10, the second at t=16.
        time::advance(Duration::from_secs(4)).await;
        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_evicts_empty_windows() {
        let limiter = RateLimiter::in_memory(&config(5, 10));
        limiter.check("a").await.unwrap();
        limiter.check("b").await.unwrap();
        assert_eq!(limiter.tracked_keys(), 2);

        time::advance(Duration::from_secs(5)).await;
        limiter.check("b").await.unwrap();
        time::advance(Duration::from_secs(5)).await;

        assert_eq!(limiter.prune().await, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_prune_deletes_idle_shared_windows() {
        let store = InMemoryStore::new();
        let clock = ManualClock::default();
        let windows = Arc::new(KvWindowStore::new(Arc::new(store.clone()), "rate"));
        let limiter = RateLimiter::shared(
            windows,
            Arc::new(clock.clone()),
            &config(5, 10),
            &TimeoutConfig::default(),
        );
        limiter.check("a").await.unwrap();
        limiter.check("b").await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        limiter.check("b").await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(limiter.prune().await, 1);
        assert_eq!(store.len("rate").await, 1);

        store.set_available(false);
        assert_eq!(limiter.prune().await, 0);
    }

    #[tokio::test]
    async fn test_from_config_honours_backend_choice() {
        let store = InMemoryStore::new();
        let service = ServiceConfig::default();
        let build = |backend| {
            RateLimiter::from_config(
                &RateLimitConfig {
                    backend,
                    ..config(1, 60)
                },
                &service,
                Arc::new(store.clone()),
                Arc::new(ManualClock::default()),
                &TimeoutConfig::default(),
            )
        };

        let local = build(RateLimitBackendKind::InMemory);
        assert_eq!(local.backend_name(), "in_memory");
        assert!(local.check("client").await.is_ok());
        assert_eq!(store.len(&service.rate_limit_table()).await, 0);

        let shared = build(RateLimitBackendKind::Shared);
        assert_eq!(shared.backend_name(), "shared");
        assert!(shared.check("client").await.is_ok());
        assert!(shared.check("client").await.is_err());
        assert_eq!(store.len(&service.rate_limit_table()).await, 1);
    }

    #[tokio::test]
    async fn test_shared_backend_fails_open() {
        let store = InMemoryStore::new();
        let windows = Arc::new(KvWindowStore::new(Arc::new(store.clone()), "rate"));
        let limiter = RateLimiter::shared(
            windows,
            Arc::new(ManualClock::default()),
            &config(1, 60),
            &TimeoutConfig::default(),
        );

        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_err());

        store.set_available(false);
        assert!(limiter.check("client").await.is_ok());
        assert!(limiter.check("client").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::in_memory(&RateLimitConfig {
            enabled: false,
            limit: 1,
            ..RateLimitConfig::default()
        });
        for _ in 0..5 {
            assert!(limiter.check("client").await.is_ok());
        }
    }

    #[test]
    fn test_rejection_response() {
        let response = RateLimitError::TooManyRequests {
            key: "api:k".into(),
            limit: 1,
            window_secs: 60,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    }
}
