//! Status projection
//!
//! Both views are computed from the persisted Incident Record, never from
//! in-process run state, so any replica can answer them.

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{PipelineCatalog, PipelineError};
use crate::storage::PipelineStore;
use crate::types::{IncidentRecord, IncidentStatus};

/// Poll view of one incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub report_id: String,
    pub incident_id: String,
    pub status: IncidentStatus,
    pub progress: u8,
    pub current_stage: Option<String>,
    pub cache_hit: bool,
    pub agents_completed: Vec<String>,
    pub agents_skipped: Vec<String>,
    pub agents_failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusView {
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Clone)]
pub struct StatusProjector {
    store: Arc<dyn PipelineStore>,
    catalog: PipelineCatalog,
    poll_interval: Duration,
}

impl StatusProjector {
    pub fn new(store: Arc<dyn PipelineStore>, catalog: PipelineCatalog, poll_interval: Duration) -> Self {
        Self {
            store,
            catalog,
            poll_interval,
        }
    }

    /// Current view of `report_id`.
    pub fn poll(&self, report_id: &str) -> Result<StatusView, PipelineError> {
        let record = self
            .store
            .get_incident(report_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("report {report_id}")))?;
        self.project(record)
    }

    fn project(&self, record: IncidentRecord) -> Result<StatusView, PipelineError> {
        let definition = self.catalog.for_variant(record.variant);
        let declared = definition.stage_names();

        let result = match (record.status, record.result_pointer.as_deref()) {
            (IncidentStatus::Complete, Some(stage)) => self
                .store
                .get_stage_output(&record.incident_id, stage)?
                .map(|out| out.data.payload()),
            _ => None,
        };
        let error = match record.status {
            IncidentStatus::Failed => record.error.clone(),
            _ => None,
        };

        Ok(StatusView {
            report_id: record.incident_id.clone(),
            progress: record.progress(),
            current_stage: record.current_stage(&declared).map(String::from),
            cache_hit: !record.pipeline_run.agents_skipped.is_empty(),
            status: record.status,
            result,
            error,
            incident_id: record.incident_id,
            agents_completed: record.pipeline_run.agents_completed,
            agents_skipped: record.pipeline_run.agents_skipped,
            agents_failed: record.pipeline_run.agents_failed,
        })
    }

    /// Push variant of [`poll`](Self::poll).
    ///
    /// Yields the first view immediately, then one view per interval. The
    /// stream ends right after yielding a terminal view, or after yielding a
    /// single error (including not-found).
    pub fn subscribe(&self, report_id: String) -> BoxStream<'static, Result<StatusView, PipelineError>> {
        let projector = self.clone();
        stream::unfold(Some((projector, report_id, true)), |state| async move {
            let (projector, report_id, first) = state?;
            if !first {
                tokio::time::sleep(projector.poll_interval).await;
            }
            match projector.poll(&report_id) {
                Ok(view) if view.is_terminal() => Some((Ok(view), None)),
                Ok(view) => Some((Ok(view), Some((projector, report_id, false)))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}
