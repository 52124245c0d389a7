//! API route definitions
//!
//! - /api/v1/workflow/infrastructure-report - submit, poll, subscribe
//! - /api/v1/workflow/infrastructure-report/incident - stored incident and artifact
//! - /api/v1/health and /health - store reachability

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};
use super::ws;

const REPORT: &str = "/workflow/infrastructure-report";

/// Routes nested under `/api/v1`
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route(REPORT, post(handlers::start_report))
        .route(&format!("{REPORT}/bulk"), post(handlers::start_bulk_report))
        .route(&format!("{REPORT}/:report_id"), get(handlers::get_report_status))
        .route(&format!("{REPORT}/:report_id/ws"), get(ws::report_status_ws))
        .route(
            &format!("{REPORT}/incident/:incident_id"),
            get(handlers::get_incident),
        )
        .route(
            &format!("{REPORT}/incident/:incident_id/artifact"),
            get(handlers::get_incident_artifact),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Health endpoint at root level for load balancers
pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
