//! Image analysis endpoint
//!
//! Every outcome, including failures, is answered with HTTP 200 and a JSON
//! body; clients distinguish results by the `error` / `diagnosis` fields.

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use malaria_detect::Prediction;

use crate::state::SharedState;

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Seconds, rounded to 2 decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzeResponse {
    fn success(prediction: &Prediction, model_name: &str) -> Self {
        Self {
            diagnosis: Some(prediction.diagnosis.clone()),
            confidence: Some(prediction.confidence),
            processing_time: Some((prediction.processing_time * 100.0).round() / 100.0),
            model_used: Some(model_name.to_string()),
            error: None,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn processing_error(e: impl std::fmt::Display) -> Self {
        Self::rejected(format!("Processing error: {}", e))
    }

    fn model_not_loaded() -> Self {
        Self {
            diagnosis: Some("error".to_string()),
            confidence: Some(0.0),
            error: Some("Model not loaded".to_string()),
            ..Self::default()
        }
    }

    fn prediction_failed(e: impl std::fmt::Display) -> Self {
        Self {
            diagnosis: Some("error".to_string()),
            confidence: Some(0.0),
            processing_time: Some(0.0),
            model_used: None,
            error: Some(e.to_string()),
        }
    }
}

/// POST /analyze - classify the uploaded `image` field
pub async fn analyze_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<AnalyzeResponse> {
    let bytes = match read_upload(multipart).await {
        Ok(bytes) => bytes,
        Err(response) => return Json(response),
    };

    if !state.model_loaded() {
        return Json(AnalyzeResponse::model_not_loaded());
    }

    let worker_state = state.clone();
    let response = tokio::task::spawn_blocking(move || predict(&worker_state, &bytes))
        .await
        .unwrap_or_else(|e| {
            error!("API error: {}", e);
            AnalyzeResponse::processing_error(e)
        });
    Json(response)
}

async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Bytes, AnalyzeResponse> {
    let mut multipart = multipart.map_err(AnalyzeResponse::processing_error)?;

    while let Some(field) = multipart.next_field().await.map_err(AnalyzeResponse::processing_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let is_image = field.content_type().is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(AnalyzeResponse::rejected("File is not an image"));
        }

        let bytes = field.bytes().await.map_err(AnalyzeResponse::processing_error)?;
        if bytes.is_empty() {
            return Err(AnalyzeResponse::rejected("Empty image file"));
        }
        return Ok(bytes);
    }

    Err(AnalyzeResponse::processing_error(format!("missing '{}' field", IMAGE_FIELD)))
}

fn predict(state: &SharedState, bytes: &[u8]) -> AnalyzeResponse {
    let Some(predictor) = state.predictor() else {
        return AnalyzeResponse::model_not_loaded();
    };

    match predictor.predict_bytes(bytes) {
        Ok(prediction) => {
            info!(
                "{} ({:.3}) in {:.3}s",
                prediction.diagnosis, prediction.confidence, prediction.processing_time
            );
            AnalyzeResponse::success(&prediction, predictor.model_name())
        }
        Err(e) => {
            error!("Prediction error: {}", e);
            AnalyzeResponse::prediction_failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
    use image::{Rgb, RgbImage};
    use tower::ServiceExt;

    use super::*;
    use crate::routes::router;
    use crate::state::tests::{loaded_state, poison};
    use crate::state::AppState;

    const BOUNDARY: &str = "malaria-test-boundary";

    fn empty_state() -> SharedState {
        Arc::new(AppState::new(None, "reports".into()))
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(24, 24, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 140]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        bytes
    }

    fn upload(field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cell.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(state: SharedState, request: Request<Body>) -> serde_json::Value {
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let body = send(loaded_state(), upload("image", "image/png", &png_bytes())).await;

        let diagnosis = body["diagnosis"].as_str().unwrap();
        assert!(diagnosis == "parasitized" || diagnosis == "uninfected");
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.5..=1.0).contains(&confidence));
        assert!(body["processing_time"].as_f64().unwrap() >= 0.0);
        assert_eq!(body["model_used"], "MalariaClassifier");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_analyze_after_failed_inference() {
        let state = loaded_state();
        poison(&state);

        let body = send(state, upload("image", "image/png", &png_bytes())).await;
        assert!(body["diagnosis"] == "parasitized" || body["diagnosis"] == "uninfected");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_analyze_rejects_non_image() {
        let body = send(loaded_state(), upload("image", "text/plain", b"hello")).await;
        assert_eq!(body, serde_json::json!({"error": "File is not an image"}));
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_upload() {
        let body = send(loaded_state(), upload("image", "image/png", &[])).await;
        assert_eq!(body, serde_json::json!({"error": "Empty image file"}));
    }

    #[tokio::test]
    async fn test_analyze_without_model() {
        let body = send(empty_state(), upload("image", "image/png", &png_bytes())).await;
        assert_eq!(
            body,
            serde_json::json!({"diagnosis": "error", "confidence": 0.0, "error": "Model not loaded"})
        );
    }

    #[tokio::test]
    async fn test_analyze_undecodable_image() {
        let body = send(loaded_state(), upload("image", "image/png", b"definitely not a png")).await;
        assert_eq!(body["diagnosis"], "error");
        assert_eq!(body["confidence"], 0.0);
        assert_eq!(body["processing_time"], 0.0);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_analyze_missing_field() {
        let body = send(loaded_state(), upload("file", "image/png", &png_bytes())).await;
        assert!(body["error"].as_str().unwrap().starts_with("Processing error:"));
    }

    #[tokio::test]
    async fn test_health_and_model_info_with_model() {
        let state = loaded_state();
        let health = router(state.clone())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(health.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["model_loaded"], true);

        let info = router(state)
            .oneshot(Request::get("/model-info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(info.into_body(), usize::MAX).await.unwrap();
        let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["model_name"], "MalariaClassifier");
        assert_eq!(info["input_size"], 32);
        assert!(info["total_parameters"].as_u64().unwrap() > 0);
    }
}
