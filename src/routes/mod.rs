use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{make_span_with_request_id, request_id_middleware};

pub mod categories;
pub mod recommendations;
pub mod state;

pub use state::AppState;

/// Creates the application router with all routes and HTTP layers
pub fn create_router(state: AppState, prefix: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(prefix, api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under the environment prefix
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/available-entities", get(categories::available_entities))
        .route("/recommendations", post(recommendations::submit))
        .route(
            "/recommendations/:session_id/details",
            get(recommendations::details),
        )
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
