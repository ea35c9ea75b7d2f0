//! Model upload: persist the artifacts, then swap the active model

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::error::ApiError;
use super::server::AppState;
use crate::model::ModelIdentity;

const STORED_PREFIX: &str = "uploaded_";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub model: String,
    pub labels: Option<String>,
    pub generation: u64,
}

/// One accepted multipart file, held in memory until the form is complete.
struct UploadedFile {
    stored_name: String,
    data: Bytes,
}

/// POST /upload
///
/// Multipart fields: `model` (required) and `labels` (optional). A `labels`
/// part without a file name or content counts as absent, which is what a
/// browser sends for an empty file input. Nothing is written until the form
/// has been read and validated.
pub async fn upload_model(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut model: Option<UploadedFile> = None;
    let mut labels: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse form: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "model" && name != "labels" {
            debug!("Ignoring multipart field '{}'", name);
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {} file: {}", name, e)))?;

        let blank_name = file_name.as_deref().map_or(true, |n| n.trim().is_empty());
        if name == "labels" && (blank_name || data.is_empty()) {
            debug!("No labels file in upload");
            continue;
        }

        let stored_name = stored_file_name(file_name.as_deref())
            .ok_or_else(|| ApiError::BadRequest(format!("{} file name is required", name)))?;
        let file = UploadedFile { stored_name, data };
        if name == "model" {
            model = Some(file);
        } else {
            labels = Some(file);
        }
    }

    let model =
        model.ok_or_else(|| ApiError::BadRequest("model file is required".to_string()))?;

    let model_path = persist(&state.upload_dir, &model).await?;
    let labels_path = match &labels {
        Some(file) => Some(persist(&state.upload_dir, file).await?),
        None => None,
    };

    let identity = ModelIdentity::new(
        model_path.display().to_string(),
        labels_path.map(|p| p.display().to_string()),
    )?;

    let active = state.coordinator.swap_model(identity)?;
    info!("Model upload activated {}", active.identity);

    Ok(Json(UploadResponse {
        status: "success",
        model: active.identity.model_ref.clone(),
        labels: active.identity.labels_ref.clone(),
        generation: active.generation,
    }))
}

/// Write `file` next to its final name, then rename it into place so a
/// backend call reading the previous upload never sees a partial file.
async fn persist(upload_dir: &Path, file: &UploadedFile) -> Result<PathBuf, ApiError> {
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = upload_dir.join(format!(".{}.{}.tmp", file.stored_name, seq));
    let path = upload_dir.join(&file.stored_name);

    tokio::fs::write(&tmp_path, &file.data)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save {}: {}", file.stored_name, e)))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(ApiError::Internal(format!(
            "Failed to save {}: {}",
            file.stored_name, e
        )));
    }

    debug!("Stored upload ({} bytes) at {:?}", file.data.len(), path);
    Ok(path)
}

/// Name an upload is stored under: `uploaded_<basename>`.
///
/// Directory components from the client are dropped so an upload can never
/// land outside the upload directory.
fn stored_file_name(client_name: Option<&str>) -> Option<String> {
    let base = client_name?.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(format!("{}{}", STORED_PREFIX, base))
}
