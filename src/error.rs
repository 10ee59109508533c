use crate::domain::email::ValidationError;
use crate::services::attachment_service::StagingError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced synchronously to the HTTP caller. Anything that happens
/// after a request has been handed to the dispatcher ends up in an outcome
/// record instead.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("Could not validate credentials")]
    Forbidden,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(e) => {
                tracing::debug!(reason = %e, "Request failed validation");
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            Self::Staging(e @ StagingError::Storage(_)) => {
                tracing::error!(error = %e, "Attachment staging failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload attachment".to_string())
            }
            Self::Staging(e) => {
                tracing::debug!(reason = %e, "Attachment rejected");
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            Self::Forbidden => {
                tracing::debug!("API key check failed");
                (StatusCode::FORBIDDEN, "Could not validate credentials".to_string())
            }
            Self::BadRequest(msg) => {
                tracing::debug!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
