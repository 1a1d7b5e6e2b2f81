use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use axum_extra::routing::TypedPath;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::middleware;
use crate::state::AppState;

#[derive(Debug, Clone, TypedPath)]
#[typed_path("/begin")]
pub struct BeginPath;

#[derive(Debug, Clone, Deserialize, TypedPath)]
#[typed_path("/{id}/update")]
pub struct UpdatePath {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, TypedPath)]
#[typed_path("/{id}/end")]
pub struct EndPath {
    pub id: String,
}

#[derive(Debug, Clone, TypedPath)]
#[typed_path("/csv")]
pub struct CsvPath;

#[derive(Debug, Clone, TypedPath)]
#[typed_path("/health")]
pub struct HealthPath;

/// Build the full Axum app: authenticated ingestion routes, the open health
/// probe, and the shared middleware stack.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ingestion = Router::new()
        .route(BeginPath::PATH, post(api::begin_run))
        .route(UpdatePath::PATH, put(api::update_run))
        .route(EndPath::PATH, post(api::end_run))
        .route(CsvPath::PATH, get(api::export_csv))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    Router::new()
        .route(HealthPath::PATH, get(api::health))
        .merge(ingestion)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(CompressionLayer::new())
                .layer(axum::middleware::from_fn(middleware::security_headers)),
        )
}
