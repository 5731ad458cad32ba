use axum::{http::Method, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::services::MonitorService;
use crate::version::VERSION;
use crate::web::routes::*;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub monitor_service: Arc<MonitorService>,
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": VERSION }))
}

async fn not_found_handler() -> AppError {
    AppError::NotFound("Endpoint not found".to_string())
}

pub fn create_axum_router(monitor_service: Arc<MonitorService>) -> Router {
    let app_state = Arc::new(AppState { monitor_service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/urls", url_routes::create_url_router())
        .fallback(not_found_handler)
        .with_state(app_state)
        .layer(cors)
}
