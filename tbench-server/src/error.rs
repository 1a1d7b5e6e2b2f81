use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api_models::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl From<tbench_storage::Error> for ApiError {
    fn from(err: tbench_storage::Error) -> Self {
        use tbench_storage::Error;
        match err {
            Error::NotFound(_) => ApiError::NotFound(err.to_string()),
            Error::InvalidRunId(_) | Error::UnknownVariant { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            Error::Io(_) | Error::Csv(_) | Error::Sink { .. } | Error::Persistence { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Task join error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => {
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(msg) => {
                error!("Request failed: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
