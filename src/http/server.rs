//! HTTP server implementation.

use std::net::SocketAddr;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{enforce_admission, AdmissionState};
use crate::error::{Result, WardenError};
use crate::store::CounterStore;

/// Build the service router with every route behind admission control.
pub fn router<S>(state: AdmissionState<S>) -> Router
where
    S: CounterStore + ?Sized + 'static,
{
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .layer(from_fn_with_state(state, enforce_admission::<S>))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Request successful" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// HTTP server for the admission-controlled service.
pub struct HttpServer<S: CounterStore + ?Sized + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    state: AdmissionState<S>,
}

impl<S: CounterStore + ?Sized + 'static> HttpServer<S> {
    pub fn new(addr: SocketAddr, state: AdmissionState<S>) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                WardenError::Server(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StoreFailureMode};
    use crate::ratelimit::{AdmissionEngine, LimitPolicy, PolicySet, LIMIT_EXCEEDED_MESSAGE};
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state_with(store: Arc<MemoryStore>, server: &ServerConfig) -> AdmissionState<MemoryStore> {
        let policies = PolicySet::new(LimitPolicy::per_second(2, 300))
            .with_token("test-token", LimitPolicy::per_second(10, 300));
        let engine = Arc::new(AdmissionEngine::new(store, policies));
        AdmissionState::new(engine, server).unwrap()
    }

    fn request(forwarded_for: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded_for);
        if let Some(token) = token {
            builder = builder.header("API_KEY", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_passes_through() {
        let app = router(state_with(Arc::new(MemoryStore::new()), &ServerConfig::default()));

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert_eq!(body_json(response).await["message"], "Request successful");
    }

    #[tokio::test]
    async fn test_blocked_request_gets_429() {
        let app = router(state_with(Arc::new(MemoryStore::new()), &ServerConfig::default()));

        for _ in 0..2 {
            let response = app.clone().oneshot(request("192.168.1.1", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        let retry_after: u64 = response.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 290 && retry_after <= 300);
        assert_eq!(body_json(response).await["error"], LIMIT_EXCEEDED_MESSAGE);
    }

    #[tokio::test]
    async fn test_token_gets_its_own_budget() {
        let app = router(state_with(Arc::new(MemoryStore::new()), &ServerConfig::default()));

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("192.168.1.1", Some("test-token")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    }

    #[tokio::test]
    async fn test_health_route_is_limited_too() {
        let app = router(state_with(Arc::new(MemoryStore::new()), &ServerConfig::default()));
        let health = || {
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(health()).await.unwrap();
        assert_eq!(body_json(response).await["status"], "healthy");
        app.clone().oneshot(health()).await.unwrap();

        let response = app.oneshot(health()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error_by_default() {
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let app = router(state_with(store, &ServerConfig::default()));

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_store_failure_can_fail_closed() {
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let server = ServerConfig {
            on_store_error: StoreFailureMode::Deny,
            ..ServerConfig::default()
        };
        let app = router(state_with(store, &server));

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["error"], LIMIT_EXCEEDED_MESSAGE);
    }

    #[test]
    fn test_invalid_token_header_is_config_error() {
        let server = ServerConfig {
            token_header: "bad header".to_string(),
            ..ServerConfig::default()
        };
        let engine = Arc::new(AdmissionEngine::new(
            Arc::new(MemoryStore::new()),
            PolicySet::new(LimitPolicy::per_second(1, 1)),
        ));

        assert!(matches!(
            AdmissionState::new(engine, &server),
            Err(WardenError::Config(_))
        ));
    }

    /// Store whose block check never completes in time.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn increment(&self, _key: &str) -> std::result::Result<u64, StoreError> {
            Ok(1)
        }
        async fn current_count(&self, _key: &str) -> std::result::Result<u64, StoreError> {
            Ok(0)
        }
        async fn set_expiration(
            &self,
            _key: &str,
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }
        async fn is_blocked(&self, _key: &str) -> std::result::Result<bool, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }
        async fn block(&self, _key: &str, _ttl: Duration) -> std::result::Result<(), StoreError> {
            Ok(())
        }
        async fn reset(&self, _key: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }
        async fn close(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_deadline_is_a_failure_not_a_verdict() {
        let server = ServerConfig {
            store_timeout_ms: 50,
            ..ServerConfig::default()
        };
        let engine = Arc::new(AdmissionEngine::new(
            Arc::new(StalledStore),
            PolicySet::new(LimitPolicy::per_second(5, 300)),
        ));
        let app = router(AdmissionState::new(engine, &server).unwrap());

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// Memory store whose expiration call lands well after the deadline.
    struct SlowExpiryStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CounterStore for SlowExpiryStore {
        async fn increment(&self, key: &str) -> std::result::Result<u64, StoreError> {
            self.inner.increment(key).await
        }
        async fn current_count(&self, key: &str) -> std::result::Result<u64, StoreError> {
            self.inner.current_count(key).await
        }
        async fn set_expiration(
            &self,
            key: &str,
            ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inner.set_expiration(key, ttl).await
        }
        async fn is_blocked(&self, key: &str) -> std::result::Result<bool, StoreError> {
            self.inner.is_blocked(key).await
        }
        async fn block(&self, key: &str, ttl: Duration) -> std::result::Result<(), StoreError> {
            self.inner.block(key, ttl).await
        }
        async fn reset(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.reset(key).await
        }
        async fn close(&self) -> std::result::Result<(), StoreError> {
            self.inner.close().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_does_not_strand_counter_without_ttl() {
        let server = ServerConfig {
            store_timeout_ms: 50,
            ..ServerConfig::default()
        };
        let store = Arc::new(SlowExpiryStore {
            inner: MemoryStore::new(),
        });
        let engine = Arc::new(AdmissionEngine::new(
            Arc::clone(&store),
            PolicySet::new(LimitPolicy::per_second(5, 300)),
        ));
        let app = router(AdmissionState::new(engine, &server).unwrap());

        let response = app.oneshot(request("192.168.1.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // The detached evaluation still installs the window TTL, so the count lapses.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.current_count("ip:192.168.1.1").await.unwrap(), 0);
    }
}
