//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vchat_orchestrator::OrchestratorError;
use vchat_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::InvalidJob(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Orchestrator(e) => match e {
                OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::JobBusy(_)
                | OrchestratorError::NotRunning(_)
                | OrchestratorError::Abandoned(_) => StatusCode::CONFLICT,
                OrchestratorError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                OrchestratorError::LaunchFailure(_)
                | OrchestratorError::Config(_)
                | OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status.is_server_error()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
