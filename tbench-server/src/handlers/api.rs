use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tbench_storage::SinkKind;

use crate::api_models::{BeginRequest, ExportParams, HealthInfo};
use crate::error::ApiError;
use crate::handlers::common::{merge_response, parse_fields, parse_run_id};
use crate::routes::{EndPath, UpdatePath};
use crate::state::AppState;

pub async fn begin_run(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let id = state.coordinator.begin_run(request.into());
    Ok(id.to_string())
}

pub async fn update_run(
    UpdatePath { id }: UpdatePath,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_run_id(&id)?;
    let fields = parse_fields(&body)?;
    let report = state.coordinator.report_partial(id, &fields)?;
    Ok(merge_response(report.applied, &report.rejected))
}

pub async fn end_run(
    EndPath { id }: EndPath,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_run_id(&id)?;
    let fields = parse_fields(&body)?;

    let coordinator = state.coordinator.clone();
    let finalized = tokio::task::spawn_blocking(move || coordinator.end_run(id, &fields)).await??;

    Ok(merge_response(
        finalized.merge.applied,
        &finalized.merge.rejected,
    ))
}

pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let kind = if params.emergency {
        SinkKind::Emergency
    } else {
        SinkKind::Primary
    };

    let coordinator = state.coordinator.clone();
    let table = tokio::task::spawn_blocking(move || coordinator.export(kind)).await??;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", kind.attachment_name()),
            ),
        ],
        table,
    )
        .into_response())
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok".to_string(),
        active_runs: state.coordinator.active_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
