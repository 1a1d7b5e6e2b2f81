use axum::Json;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tbench_storage::{FieldError, RunId};

use crate::api_models::{RejectedField, RejectedFieldsResponse};
use crate::error::ApiError;

pub fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse::<RunId>().map_err(ApiError::from)
}

/// Agents may post an empty body to `/end`; that is an empty report.
pub fn parse_fields(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Map::new());
    }
    serde_json::from_slice::<Map<String, Value>>(body)
        .map_err(|e| ApiError::BadRequest(format!("Body must be a JSON object: {}", e)))
}

/// 204 when every field merged, 422 listing the ones that did not.
pub fn merge_response(applied: usize, rejected: &[FieldError]) -> Response {
    if rejected.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(RejectedFieldsResponse {
            applied,
            rejected: rejected.iter().map(RejectedField::from).collect(),
        }),
    )
        .into_response()
}
