//! Health check endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

pub const SERVICE_NAME: &str = "malaria-ml-api";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `model_not_loaded`
    pub status: String,
    pub service: String,
    pub device: String,
    pub model_loaded: bool,
}

/// GET /health
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let loaded = state.model_loaded();
    Json(HealthResponse {
        status: if loaded { "healthy" } else { "model_not_loaded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        device: state.device.clone(),
        model_loaded: loaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_without_model() {
        let state = Arc::new(AppState::new(None, "missing".into()));
        let Json(body) = health_check(State(state)).await;
        assert_eq!(body.status, "model_not_loaded");
        assert_eq!(body.service, SERVICE_NAME);
        assert!(!body.model_loaded);
    }
}
