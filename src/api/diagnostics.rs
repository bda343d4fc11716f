/// Diagnostics endpoints

use crate::api::{ApiError, AppState};
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn create_diagnostics_routes() -> Router<AppState> {
    Router::new().route("/api/diagnostics/error-chains", get(error_chains))
}

/// Blocking chains of every blocked ERROR object, from one store snapshot
///
/// GET /api/diagnostics/error-chains
async fn error_chains(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let chains = state
        .holdingpen
        .diagnoser
        .diagnose()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "chains": chains })))
}
