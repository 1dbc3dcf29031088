use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::paths::PathError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("origin denied")]
    OriginDenied,
    #[error("rate limited")]
    RateLimited,
    #[error("Access denied: path outside server root")]
    OutsideRoot,
    #[error("Path does not exist: {0}")]
    NotFound(String),
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),
    #[error("Error scanning directory: {0}")]
    InspectionFailure(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::OriginDenied => "OriginDenied",
            AppError::RateLimited => "RateLimited",
            AppError::OutsideRoot => "OutsideRoot",
            AppError::NotFound(_) => "NotFound",
            AppError::NotADirectory(_) => "NotADirectory",
            AppError::InspectionFailure(_) => "InspectionFailure",
            AppError::BadRequest(_) => "BadRequest",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::OriginDenied | AppError::OutsideRoot => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotADirectory(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InspectionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathError> for AppError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::OutsideRoot => AppError::OutsideRoot,
            PathError::NotFound(p) => AppError::NotFound(p),
            PathError::NotADirectory(p) => AppError::NotADirectory(p),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
