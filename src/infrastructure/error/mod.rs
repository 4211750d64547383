use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Config(_) | AppError::StoreUnavailable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound(id) => AppError::NotFound(format!("Room {} not found", id)),
            StoreError::RoomFull(id) => AppError::Forbidden(format!("Room {} is full", id)),
            StoreError::DuplicateRoom(id) => {
                AppError::Internal(format!("Room {} already exists", id))
            }
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Postgres(e) => AppError::StoreUnavailable(e.to_string()),
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::RoomNotFound(id) => {
                AppError::NotFound(format!("Room {} not found", id))
            }
            AdmissionError::RoomFull(id) => AppError::Forbidden(format!("Room {} is full", id)),
            AdmissionError::UpgradeFailed(msg) => AppError::Validation(msg),
            AdmissionError::StoreUnavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                ("CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => ("VALIDATION_ERROR", msg.clone(), msg.clone()),
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone(), msg.clone()),
            AppError::Forbidden(msg) => ("ROOM_FULL", msg.clone(), msg.clone()),
            AppError::StoreUnavailable(e) => {
                let client_msg = if is_production() {
                    "Service temporarily unavailable".to_string()
                } else {
                    e.clone()
                };
                ("STORE_UNAVAILABLE", client_msg, e.clone())
            }
            AppError::Internal(e) => {
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    e.clone()
                };
                ("INTERNAL_ERROR", client_msg, e.clone())
            }
        };

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::info!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}
