//! Request handlers for the report workflow endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::pipeline::{PipelineService, StartResponse};
use crate::types::{IncidentStatus, MultiReportRequest, ReportRequest};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<PipelineService>,
}

impl ApiState {
    pub const fn new(service: Arc<PipelineService>) -> Self {
        Self { service }
    }
}

fn started(response: StartResponse) -> Response {
    if response.status == IncidentStatus::Complete {
        ApiResponse::ok(response)
    } else {
        ApiResponse::accepted(response)
    }
}

fn rejected(rejection: &JsonRejection) -> Response {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiErrorResponse::payload_too_large(rejection.body_text());
    }
    ApiErrorResponse::bad_request(rejection.body_text())
}

// ============================================================================
// Submission
// ============================================================================

/// POST /api/v1/workflow/infrastructure-report
pub async fn start_report(
    State(state): State<ApiState>,
    body: Result<Json<ReportRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(&rejection),
    };
    match state.service.start_single(request) {
        Ok(response) => started(response),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/workflow/infrastructure-report/bulk
pub async fn start_bulk_report(
    State(state): State<ApiState>,
    body: Result<Json<MultiReportRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(&rejection),
    };
    match state.service.start_multi(request) {
        Ok(response) => started(response),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/v1/workflow/infrastructure-report/:report_id
pub async fn get_report_status(
    State(state): State<ApiState>,
    Path(report_id): Path<String>,
) -> Response {
    match state.service.get_status(&report_id) {
        Ok(view) => ApiResponse::ok(view),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/workflow/infrastructure-report/incident/:incident_id
pub async fn get_incident(
    State(state): State<ApiState>,
    Path(incident_id): Path<String>,
) -> Response {
    match state.service.get_incident(&incident_id) {
        Ok(detail) => ApiResponse::ok(detail),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/workflow/infrastructure-report/incident/:incident_id/artifact
///
/// Raw document bytes, not wrapped in the envelope.
pub async fn get_incident_artifact(
    State(state): State<ApiState>,
    Path(incident_id): Path<String>,
) -> Response {
    let artifact = match state.service.get_artifact(&incident_id) {
        Ok(artifact) => artifact,
        Err(e) => return e.into_response(),
    };

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.file_name
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response()
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub runs_in_flight: usize,
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let store = state.service.store();
    match store.ping() {
        Ok(()) => ApiResponse::ok(HealthResponse {
            status: "ok",
            store: store.backend_name(),
            runs_in_flight: state.service.tracker().len(),
        }),
        Err(e) => {
            warn!(error = %e, "Health check: store unreachable");
            ApiErrorResponse::service_unavailable(format!("store unreachable: {e}"))
        }
    }
}

/// Fallback for unmatched paths.
pub async fn not_found() -> Response {
    ApiErrorResponse::not_found("no such endpoint")
}
