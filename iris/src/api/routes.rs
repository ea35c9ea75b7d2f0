use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::server::AppState;
use crate::coordinator::CoordinatorStats;
use crate::model::InputKey;

#[derive(Deserialize)]
pub struct PredictionRequest {
    #[serde(default)]
    pub image_url: String,
}

/// POST /predict (also mounted at /train)
///
/// Responds with the backend payload exactly as it was produced.
pub async fn predict(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: PredictionRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?;
    let key = InputKey::new(request.image_url)?;

    let payload = state.coordinator.predict(&key).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], payload).into_response())
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub labels: Option<String>,
    pub generation: u64,
    pub activated_at: DateTime<Utc>,
    pub backend: String,
}

pub async fn get_model(State(state): State<AppState>) -> Json<ModelInfo> {
    let active = state.coordinator.active_model();
    Json(ModelInfo {
        model: active.identity.model_ref.clone(),
        labels: active.identity.labels_ref.clone(),
        generation: active.generation,
        activated_at: active.activated_at,
        backend: state.coordinator.backend_name().to_string(),
    })
}

pub async fn get_cache_stats(State(state): State<AppState>) -> Json<CoordinatorStats> {
    Json(state.coordinator.stats())
}

pub async fn health() -> &'static str {
    "OK"
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
