use crate::db::models::{MonitorSummary, TargetWithResult};
use crate::web::models::url_models::{
    CheckAllQuery, CheckAllResponse, CheckResponse, ControlResponse, CreateUrl, DeleteResponse,
};
use crate::web::{AppError, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;

pub fn create_url_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_urls).post(create_url))
        .route("/stats", get(get_stats))
        .route("/check-all", post(check_all_urls))
        .route("/{id}", get(get_url).delete(delete_url))
        .route("/{id}/start", post(start_url))
        .route("/{id}/stop", post(stop_url))
        .route("/{id}/check", post(check_url))
}

/// Targets keyed by id, each with its last result.
#[axum::debug_handler]
async fn list_urls(
    State(app_state): State<Arc<AppState>>,
) -> Json<HashMap<String, TargetWithResult>> {
    let targets = app_state
        .monitor_service
        .list()
        .await
        .into_iter()
        .map(|t| (t.target.id.clone(), t))
        .collect();
    Json(targets)
}

#[axum::debug_handler]
async fn get_stats(State(app_state): State<Arc<AppState>>) -> Json<MonitorSummary> {
    Json(app_state.monitor_service.summary().await)
}

#[axum::debug_handler]
async fn create_url(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<CreateUrl>, JsonRejection>,
) -> Result<(StatusCode, Json<TargetWithResult>), AppError> {
    let Json(payload) = payload?;
    let start = payload.active;
    let created = app_state
        .monitor_service
        .create(payload.into(), start)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[axum::debug_handler]
async fn get_url(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TargetWithResult>, AppError> {
    Ok(Json(app_state.monitor_service.get(&id).await?))
}

#[axum::debug_handler]
async fn start_url(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    let outcome = app_state.monitor_service.start(&id).await?;
    let message = if outcome.changed { "Started" } else { "Already running" };
    Ok(Json(ControlResponse {
        message,
        target: outcome.target,
    }))
}

#[axum::debug_handler]
async fn stop_url(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    let outcome = app_state.monitor_service.stop(&id).await?;
    let message = if outcome.changed { "Stopped" } else { "Already stopped" };
    Ok(Json(ControlResponse {
        message,
        target: outcome.target,
    }))
}

#[axum::debug_handler]
async fn check_url(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckResponse>, AppError> {
    let result = app_state.monitor_service.check(&id).await?;
    Ok(Json(CheckResponse {
        message: "Checked",
        result,
    }))
}

#[axum::debug_handler]
async fn check_all_urls(
    State(app_state): State<Arc<AppState>>,
    query: Result<Query<CheckAllQuery>, QueryRejection>,
) -> Result<Json<CheckAllResponse>, AppError> {
    let Query(query) = query?;
    let outcome = app_state.monitor_service.check_all(query.wait).await;
    let message = if query.wait { "Checked" } else { "Checks dispatched" };
    Ok(Json(CheckAllResponse {
        message,
        dispatched: outcome.dispatched,
        results: outcome.results,
    }))
}

#[axum::debug_handler]
async fn delete_url(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    app_state.monitor_service.delete(&id).await?;
    Ok(Json(DeleteResponse {
        message: "Deleted",
        id,
    }))
}
