//! Admin Surface (§4.7): idempotent control verbs and read views, served
//! under `/admin`. Bulk verbs fan out in parallel and report per-model
//! success/failure rather than aborting on partial failure.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::future::join_all;
use llamagate_core::{GatewayError, ModelEntrySnapshot};
use serde::Serialize;

use crate::error_map::gateway_error_response;
use crate::state::AppState;

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/models/{name}/start", post(start_model))
        .route("/models/{name}/stop", post(stop_model))
        .route("/models/{name}/reload", post(reload_model))
        .route("/models/{name}/status", get(model_status))
        .route("/models/start-all", post(start_all))
        .route("/models/stop-all", post(stop_all))
        .route("/models/restart-all", post(restart_all))
        .route("/groups/{group}/start", post(start_group))
        .route("/groups/{group}/stop", post(stop_group))
        .route("/groups/status", get(groups_status))
        .route("/queue/status", get(queue_status))
        .route("/queue/{name}/status", get(queue_status_one))
        .route("/queue/{name}/clear", post(queue_clear))
        .with_state(state)
}

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

#[derive(Serialize)]
struct BulkResult {
    model: String,
    ok: bool,
    error: Option<String>,
}

async fn start_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    match state.runtime.controller.start_model(handle).await {
        Ok(()) => Json(OkBody { ok: true }).into_response(),
        Err(e) => gateway_error_response(&e),
    }
}

async fn stop_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    match state.runtime.controller.stop_model(handle).await {
        Ok(()) => Json(OkBody { ok: true }).into_response(),
        Err(e) => gateway_error_response(&e),
    }
}

async fn reload_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    let config = handle.config.read().await.clone();
    match state.runtime.controller.reload_model(handle, config).await {
        Ok(()) => Json(OkBody { ok: true }).into_response(),
        Err(e) => gateway_error_response(&e),
    }
}

async fn model_status(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    Json(handle.snapshot().await).into_response()
}

async fn start_all(State(state): State<AppState>) -> Response {
    let names = state.runtime.registry.list_names().await;
    let results = bulk_apply(&state, names, |controller, handle| async move {
        controller.start_model(handle).await
    })
    .await;
    Json(results).into_response()
}

async fn stop_all(State(state): State<AppState>) -> Response {
    // "excluding preloaded" (§4.7): a preloaded model only stops via an
    // explicit single-model stop-request.
    let configs = state.runtime.registry.list_configs().await;
    let names: Vec<String> = configs.into_iter().filter(|c| !c.preload).map(|c| c.name).collect();
    let results = bulk_apply(&state, names, |controller, handle| async move {
        controller.stop_model(handle).await
    })
    .await;
    Json(results).into_response()
}

async fn restart_all(State(state): State<AppState>) -> Response {
    let snapshots = state.runtime.registry.snapshot_all().await;
    let names: Vec<String> = snapshots
        .into_iter()
        .filter(|s| s.state == llamagate_core::ModelState::Ready)
        .map(|s| s.name)
        .collect();
    let results = bulk_apply(&state, names, |controller, handle| async move {
        controller.stop_model(handle.clone()).await?;
        controller.start_model(handle).await
    })
    .await;
    Json(results).into_response()
}

async fn start_group(State(state): State<AppState>, Path(group): Path<String>) -> Response {
    group_apply(&state, &group, |controller, handle| async move {
        controller.start_model(handle).await
    })
    .await
}

async fn stop_group(State(state): State<AppState>, Path(group): Path<String>) -> Response {
    group_apply(&state, &group, |controller, handle| async move {
        controller.stop_model(handle).await
    })
    .await
}

async fn groups_status(State(state): State<AppState>) -> Response {
    let snapshots = state.runtime.registry.snapshot_all().await;
    let mut groups: HashMap<String, Vec<ModelEntrySnapshot>> = HashMap::new();
    for snapshot in snapshots {
        if let Some(group) = snapshot.resource_group.clone() {
            groups.entry(group).or_default().push(snapshot);
        }
    }
    Json(groups).into_response()
}

async fn queue_status(State(state): State<AppState>) -> Response {
    let snapshots = state.runtime.registry.snapshot_all().await;
    let depths: HashMap<String, usize> = snapshots.into_iter().map(|s| (s.name, s.queue_depth)).collect();
    Json(depths).into_response()
}

async fn queue_status_one(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    Json(serde_json::json!({ "model": name, "depth": handle.queue.depth() })).into_response()
}

async fn queue_clear(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(handle) = state.runtime.registry.get(&name).await else {
        return gateway_error_response(&GatewayError::ModelNotFound(name));
    };
    handle.queue.clear();
    Json(OkBody { ok: true }).into_response()
}

async fn bulk_apply<F, Fut>(state: &AppState, names: Vec<String>, op: F) -> Vec<BulkResult>
where
    F: Fn(llamagate_runtime::LifecycleController, Arc<llamagate_runtime::ModelHandle>) -> Fut + Copy,
    Fut: std::future::Future<Output = Result<(), GatewayError>>,
{
    let tasks = names.into_iter().map(|name| {
        let controller = state.runtime.controller.clone();
        let registry = state.runtime.registry.clone();
        async move {
            let Some(handle) = registry.get(&name).await else {
                return BulkResult {
                    model: name,
                    ok: false,
                    error: Some("model vanished mid-operation".to_string()),
                };
            };
            match op(controller, handle).await {
                Ok(()) => BulkResult { model: name, ok: true, error: None },
                Err(e) => BulkResult { model: name, ok: false, error: Some(e.to_string()) },
            }
        }
    });
    join_all(tasks).await
}

async fn group_apply<F, Fut>(state: &AppState, group: &str, op: F) -> Response
where
    F: Fn(llamagate_runtime::LifecycleController, Arc<llamagate_runtime::ModelHandle>) -> Fut + Copy,
    Fut: std::future::Future<Output = Result<(), GatewayError>>,
{
    let handles = state.runtime.registry.resource_group(group).await;
    let tasks = handles.into_iter().map(|handle| {
        let controller = state.runtime.controller.clone();
        async move {
            let name = handle.config.read().await.name.clone();
            match op(controller, handle).await {
                Ok(()) => BulkResult { model: name, ok: true, error: None },
                Err(e) => BulkResult { model: name, ok: false, error: Some(e.to_string()) },
            }
        }
    });
    let results: Vec<BulkResult> = join_all(tasks).await;
    Json(results).into_response()
}
