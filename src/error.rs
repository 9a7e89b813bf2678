use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Comparison error: {0}")]
    Comparison(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),
}

impl AppError {
    /// Folds transport-level failures into a listing failure so a run
    /// aborts with one descriptive message.
    pub fn into_listing(self) -> AppError {
        match self {
            AppError::Listing(_)
            | AppError::InvalidInput(_)
            | AppError::Cancelled => self,
            other => AppError::Listing(other.to_string()),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Listing(message) => message.clone(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": message,
        }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
