/// Callback endpoints for external systems
///
/// The legacy ingestion pipeline and the collector report back here; both
/// continue objects that are WAITING on them.

use crate::{
    api::{ApiError, AppState},
    runtime::callbacks::{CollectorCallback, CollectorOutcome, UploadCallback, UploadOutcome},
};
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};

pub fn create_callback_routes() -> Router<AppState> {
    Router::new()
        .route("/callback/workflows/upload", post(upload_callback))
        .route("/callback/workflows/collector", post(collector_callback))
}

/// POST /callback/workflows/upload
/// Body: { "nonce": 12, "results": [{ "success": true, "recid": 1234 }] }
/// 202 when the object is busy and the result will be applied once it waits
async fn upload_callback(
    State(state): State<AppState>,
    Json(payload): Json<UploadCallback>,
) -> Result<(StatusCode, Json<UploadOutcome>), ApiError> {
    tracing::debug!("📨 Upload callback for object {}", payload.nonce);
    let outcome = state.holdingpen.callbacks.upload(payload).await?;
    let status = match outcome {
        UploadOutcome::Deferred { .. } => StatusCode::ACCEPTED,
        UploadOutcome::Applied { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// POST /callback/workflows/collector
/// Body: { "record_ids": [1234, 1235] }
async fn collector_callback(
    State(state): State<AppState>,
    Json(payload): Json<CollectorCallback>,
) -> Result<Json<CollectorOutcome>, ApiError> {
    tracing::debug!("📨 Collector callback for {} records", payload.record_ids.len());
    Ok(Json(state.holdingpen.callbacks.collector(payload).await?))
}
