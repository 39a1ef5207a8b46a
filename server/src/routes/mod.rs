//! HTTP routes

pub mod analyze;
pub mod health;
pub mod model_info;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Uploads larger than this are rejected by the multipart extractor
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/analyze", post(analyze::analyze_image))
        .route("/health", get(health::health_check))
        .route("/model-info", get(model_info::model_info))
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
