//! Admission middleware.
//!
//! Maps engine outcomes onto HTTP: allowed requests are forwarded with
//! rate-limit headers, denied ones get 429 with the verdict's message, and
//! store failures are answered according to [`StoreFailureMode`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{instrument, trace, warn};

use super::client::{extract_client_address, extract_token};
use crate::config::{ServerConfig, StoreFailureMode};
use crate::error::{Result, WardenError};
use crate::ratelimit::{AdmissionEngine, Verdict, LIMIT_EXCEEDED_MESSAGE};
use crate::store::CounterStore;

const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared state for [`enforce_admission`].
pub struct AdmissionState<S: CounterStore + ?Sized> {
    pub engine: Arc<AdmissionEngine<S>>,
    /// Header carrying the caller's API token
    pub token_header: HeaderName,
    /// Deadline for one admission check, if any
    pub store_timeout: Option<Duration>,
    pub on_store_error: StoreFailureMode,
}

impl<S: CounterStore + ?Sized> Clone for AdmissionState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            token_header: self.token_header.clone(),
            store_timeout: self.store_timeout,
            on_store_error: self.on_store_error,
        }
    }
}

impl<S: CounterStore + ?Sized> AdmissionState<S> {
    /// Build middleware state from server configuration.
    pub fn new(engine: Arc<AdmissionEngine<S>>, server: &ServerConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(server.token_header.as_bytes()).map_err(|e| {
            WardenError::Config(format!(
                "Invalid token header name {:?}: {}",
                server.token_header, e
            ))
        })?;

        Ok(Self {
            engine,
            token_header,
            store_timeout: server.store_timeout(),
            on_store_error: server.on_store_error,
        })
    }
}

impl<S: CounterStore + ?Sized + 'static> AdmissionState<S> {
    /// Evaluate on a separate task so the store sequence always runs to
    /// completion, even when the deadline passes or the request is dropped.
    /// An increment is therefore never left without its window expiration.
    async fn evaluate(&self, address: String, token: String) -> Result<Verdict> {
        let engine = Arc::clone(&self.engine);
        let evaluation = tokio::spawn(async move { engine.evaluate(&address, &token).await });

        let joined = match self.store_timeout {
            // Dropping the handle on timeout detaches the task, it does not cancel it.
            Some(deadline) => match tokio::time::timeout(deadline, evaluation).await {
                Ok(joined) => joined,
                Err(_) => return Err(WardenError::Deadline(deadline)),
            },
            None => evaluation.await,
        };
        joined.map_err(|e| WardenError::Server(format!("Admission task failed: {}", e)))?
    }
}

/// Admit or reject a request before it reaches the inner service.
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn enforce_admission<S>(
    State(state): State<AdmissionState<S>>,
    req: Request,
    next: Next,
) -> Response
where
    S: CounterStore + ?Sized + 'static,
{
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let address = extract_client_address(req.headers(), peer);
    let token = extract_token(req.headers(), &state.token_header);

    match state.evaluate(address.clone(), token).await {
        Ok(verdict) if verdict.allowed => {
            trace!(address = %address, remaining = verdict.remaining, "Request admitted");
            let mut response = next.run(req).await;
            insert_limit_headers(response.headers_mut(), &verdict);
            response
        }
        Ok(verdict) => {
            trace!(address = %address, "Request rejected");
            too_many_requests(&verdict.message, Some(&verdict))
        }
        Err(e) => {
            warn!(address = %address, error = %e, "Admission check failed");
            match state.on_store_error {
                StoreFailureMode::ServerError => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
                }
                StoreFailureMode::Deny => too_many_requests(LIMIT_EXCEEDED_MESSAGE, None),
            }
        }
    }
}

fn insert_limit_headers(headers: &mut HeaderMap, verdict: &Verdict) {
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(verdict.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(verdict.reset_at.timestamp()));
}

fn too_many_requests(message: &str, verdict: Option<&Verdict>) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": message })),
    )
        .into_response();

    if let Some(verdict) = verdict {
        let headers = response.headers_mut();
        insert_limit_headers(headers, verdict);
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from(verdict.seconds_until_reset(Utc::now())),
        );
    }
    response
}
