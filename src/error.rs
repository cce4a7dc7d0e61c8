use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::util::image::ProcessingError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Account is temporarily locked. Please try again later.")]
    Locked,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Storage limit exceeded")]
    StorageLimitExceeded,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Locked => StatusCode::LOCKED,
            AppError::PayloadTooLarge(_) | AppError::StorageLimitExceeded => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Processing(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            AppError::Processing(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Archive(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(_) | AppError::Io(_) | AppError::Archive(_) | AppError::Internal(_) => {
                log::error!("{}", self);
                "Internal server error".to_owned()
            }
            AppError::Processing(err) => {
                if !err.is_client_error() {
                    log::error!("{}", err);
                }
                err.to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
