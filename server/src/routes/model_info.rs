//! Model metadata endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::{ModelDetails, SharedState};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ModelInfoResponse {
    Loaded {
        #[serde(flatten)]
        model: ModelDetails,
        device: String,
    },
    Missing {
        error: String,
    },
}

/// GET /model-info
///
/// Served from the details captured at load time, so it never waits on a
/// running inference.
pub async fn model_info(State(state): State<SharedState>) -> Json<ModelInfoResponse> {
    let response = match &state.model {
        Some(model) => ModelInfoResponse::Loaded {
            model: model.clone(),
            device: state.device.clone(),
        },
        None => ModelInfoResponse::Missing {
            error: "Model not loaded".to_string(),
        },
    };
    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{loaded_state, poison};
    use crate::state::AppState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_model_info_without_model() {
        let state = Arc::new(AppState::new(None, "missing".into()));
        let Json(body) = model_info(State(state)).await;
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value, serde_json::json!({"error": "Model not loaded"}));
    }

    #[tokio::test]
    async fn test_model_info_during_inference() {
        let state = loaded_state();
        // An inference in progress holds the predictor
        let busy = state.predictor().unwrap();

        let Json(body) = model_info(State(state.clone())).await;
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["model_name"], "MalariaClassifier");
        assert_eq!(value["input_size"], 32);
        assert_eq!(value["total_parameters"], busy.parameter_count());
        assert_eq!(value["device"], state.device);
    }

    #[tokio::test]
    async fn test_model_info_after_failed_inference() {
        let state = loaded_state();
        poison(&state);
        let Json(body) = model_info(State(state)).await;
        assert!(matches!(body, ModelInfoResponse::Loaded { .. }));
    }
}
