use std::sync::Arc;

use axum::extract::State;
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests whose shared secret does not match before any handler runs.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    let authorized: bool = provided.ct_eq(state.api_key.as_bytes()).into();

    if !authorized {
        warn!("Rejected unauthenticated {} {}", req.method(), req.uri().path());
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

pub async fn security_headers(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // Results change with every finished run.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    resp
}
