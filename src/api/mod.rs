/// HTTP API Layer
///
/// This module provides the REST endpoints of the holdingpen. It handles:
/// - Object submission, inspection and operator restarts
/// - Rendering and resolving halted actions
/// - Legacy ingestion and collector callbacks
/// - Error-chain diagnostics

// Object and action endpoints
pub mod objects;

// Callback endpoints for external systems
pub mod callbacks;

// Diagnostics endpoints
pub mod diagnostics;

use crate::{
    runtime::{actions::ActionError, callbacks::CallbackError, scheduler::SchedulerError},
    service::{Holdingpen, ServiceError},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;

// Re-export router builders
pub use callbacks::create_callback_routes;
pub use diagnostics::create_diagnostics_routes;
pub use objects::create_object_routes;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub holdingpen: Holdingpen,
}

/// Every API route, ready for state
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(create_object_routes())
        .merge(create_callback_routes())
        .merge(create_diagnostics_routes())
}

/// Error response with a JSON body `{ "error": ... }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        tracing::error!("❌ Request failed: {}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn scheduler_error(e: SchedulerError) -> ApiError {
    match e {
        SchedulerError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
        SchedulerError::LockContended(_) => ApiError::new(StatusCode::CONFLICT, e.to_string()),
        other => ApiError::internal(other),
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::UnknownWorkflow(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            ServiceError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            ServiceError::NotRestartable { .. } => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            ServiceError::Scheduler(e) => scheduler_error(e),
            ServiceError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            ActionError::Busy(_) | ActionError::NotHalted { .. } | ActionError::Stale { .. } => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            ActionError::UnknownAction { .. } | ActionError::InvalidInput(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            ActionError::Scheduler(e) => scheduler_error(e),
            ActionError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<CallbackError> for ApiError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            CallbackError::Stale { .. } => ApiError::new(StatusCode::CONFLICT, e.to_string()),
            CallbackError::Malformed(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            CallbackError::Scheduler(e) => scheduler_error(e),
            CallbackError::Storage(e) => ApiError::internal(e),
        }
    }
}
