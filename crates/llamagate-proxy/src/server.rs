//! Axum HTTP server for the client-facing OpenAI-compatible surface.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use llamagate_core::{ErrorCategory, GatewayError};
use tracing::debug;

use crate::error_map::gateway_error_response;
use crate::forward::{ForwardOutcome, forward_request};
use crate::models::{ErrorBody, HealthResponse, ModelMetrics, MetricsResponse, ModelsResponse, CompletionRequest};
use crate::state::AppState;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn client_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots = state.runtime.registry.snapshot_all().await;
    let now = now_unix();
    let models = snapshots
        .into_iter()
        .map(|s| {
            let uptime = s.uptime_secs(now).map(|secs| secs as u64);
            (
                s.name.clone(),
                ModelMetrics {
                    status: s.state.as_str(),
                    request_count: s.request_count,
                    memory_usage_mb: None,
                    cpu_usage_percent: None,
                    uptime,
                    last_accessed: s.last_activity_ts,
                },
            )
        })
        .collect();
    Json(MetricsResponse { models })
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    debug!("GET /v1/models");
    let configs = state.runtime.registry.list_configs().await;
    Json(ModelsResponse::from_configs(&configs))
}

async fn chat_completions(state: State<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    forward_completion(state, method, "/v1/chat/completions", headers, body).await
}

async fn completions(state: State<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    forward_completion(state, method, "/v1/completions", headers, body).await
}

async fn forward_completion(
    State(state): State<AppState>,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: CompletionRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new(
                    "invalid_request",
                    format!("request body is not valid JSON or is missing 'model': {e}"),
                    ErrorCategory::Invalid,
                )),
            )
                .into_response();
        }
    };

    let Some(handle) = state.runtime.registry.get(&request.model).await else {
        let known = state.runtime.registry.list_names().await.join(", ");
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new(
                "model_not_found",
                format!("model '{}' is not configured (known models: {known})", request.model),
                ErrorCategory::NotFound,
            )),
        )
            .into_response();
    };

    let port = match state.runtime.controller.ensure_ready(&request.model).await {
        Ok(port) => port,
        Err(err) => return gateway_error_response(&err),
    };

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::POST);

    match forward_request(&state.client, reqwest_method, port, path, &headers, body, request.stream).await {
        ForwardOutcome::Response(response) => {
            handle.touch_activity(now_unix());
            handle.reset_failure_streak();
            response
        }
        ForwardOutcome::BackendError(response) => {
            // Backend answered, but with a 5xx: forward it through to the
            // client, but still count toward failure_streak (§4.5.6).
            handle.touch_activity(now_unix());
            state.runtime.controller.record_transport_failure(handle).await;
            response
        }
        ForwardOutcome::TransportFailure(reason) => {
            state.runtime.controller.record_transport_failure(handle).await;
            let err = GatewayError::BackendTransport {
                model: request.model,
                reason,
            };
            gateway_error_response(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_returns_ok_status() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
