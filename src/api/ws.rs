//! Status subscription over WebSocket
//!
//! Each text frame carries one status view. The server closes the socket
//! after sending a terminal view, or after a single error frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::handlers::ApiState;
use crate::pipeline::{PipelineError, PipelineService};

/// GET /api/v1/workflow/infrastructure-report/:report_id/ws
pub async fn report_status_ws(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(report_id): Path<String>,
) -> Response {
    let service = Arc::clone(&state.service);
    ws.on_upgrade(move |socket| stream_status(socket, service, report_id))
}

fn error_frame(err: &PipelineError) -> String {
    let message = match err {
        PipelineError::NotFound(_) => "Report not found".to_string(),
        other => other.to_string(),
    };
    json!({ "error": message }).to_string()
}

async fn stream_status(mut socket: WebSocket, service: Arc<PipelineService>, report_id: String) {
    let mut updates = service.subscribe(&report_id);

    while let Some(update) = updates.next().await {
        let frame = match update {
            Ok(view) => match serde_json::to_string(&view) {
                Ok(text) => text,
                Err(e) => json!({ "error": e.to_string() }).to_string(),
            },
            Err(e) => error_frame(&e),
        };
        if socket.send(Message::Text(frame)).await.is_err() {
            debug!(report_id = %report_id, "Subscriber went away");
            return;
        }
    }

    let _ = socket.close().await;
}
