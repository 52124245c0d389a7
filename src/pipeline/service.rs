//! Pipeline service: the operations exposed to transports
//!
//! Built once at startup from the configuration and shared (behind an
//! `Arc`) by every request handler.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::{
    ids, PipelineCatalog, PipelineDefinition, PipelineError, PipelineExecutor, StartResponse,
    StatusProjector, StatusView,
};
use crate::config::ServiceConfig;
use crate::llm::{self, ReasoningClient, ReasoningError};
use crate::services::{Artifact, ArtifactRenderer, Geocoder, MarkdownRenderer, NominatimGeocoder};
use crate::stages::{multi_incident_stages, single_incident_stages};
use crate::storage::PipelineStore;
use crate::types::{
    stage_names, BatchInputs, IncidentRecord, IncidentStatus, InvalidRequest, MultiReportRequest,
    PipelineInputs, PipelineRun, PipelineVariant, ReferencedIncident, ReportRequest,
    StageOutputRecord,
};

/// One cached stage output as shown in the incident detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutputView {
    pub data: Value,
    pub confidence: f64,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub model_used: Option<String>,
    pub tokens_used: u64,
    pub run_count: u32,
}

impl From<StageOutputRecord> for StageOutputView {
    fn from(out: StageOutputRecord) -> Self {
        Self {
            data: out.data.payload(),
            confidence: out.confidence,
            executed_at: out.executed_at,
            duration_ms: out.duration_ms,
            model_used: out.model_used,
            tokens_used: out.tokens_used,
            run_count: out.run_count,
        }
    }
}

/// Full view of one incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentDetail {
    pub incident_id: String,
    pub variant: PipelineVariant,
    pub status: IncidentStatus,
    pub inputs: PipelineInputs,
    pub pipeline_run: PipelineRun,
    pub stage_outputs: BTreeMap<String, StageOutputView>,
    pub result_pointer: Option<String>,
    pub report_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct PipelineService {
    store: Arc<dyn PipelineStore>,
    catalog: PipelineCatalog,
    executor: PipelineExecutor,
    projector: StatusProjector,
    renderer: Arc<dyn ArtifactRenderer>,
}

impl PipelineService {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        catalog: PipelineCatalog,
        renderer: Arc<dyn ArtifactRenderer>,
        config: &crate::config::PipelineConfig,
    ) -> Self {
        let executor = PipelineExecutor::new(Arc::clone(&store), config.stale_after());
        let projector = StatusProjector::new(
            Arc::clone(&store),
            catalog.clone(),
            config.status_poll_interval(),
        );
        Self {
            store,
            catalog,
            executor,
            projector,
            renderer,
        }
    }

    /// Wire the configured collaborators into both pipelines.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn PipelineStore>,
    ) -> Result<Self, ReasoningError> {
        let client: Arc<dyn ReasoningClient> = llm::build_client(&config.reasoning)?;
        let geocoder: Option<Arc<dyn Geocoder>> = if config.geocoder.enabled {
            Some(Arc::new(NominatimGeocoder::new(&config.geocoder)?))
        } else {
            None
        };

        let catalog = PipelineCatalog::new(
            PipelineDefinition::single_incident(single_incident_stages(&client, geocoder)),
            PipelineDefinition::multi_incident(multi_incident_stages(&client)),
        );
        info!(
            reasoning = client.backend_name(),
            store = store.backend_name(),
            geocoder = config.geocoder.enabled,
            single_stages = ?catalog.single.stage_names(),
            multi_stages = ?catalog.multi.stage_names(),
            "Pipeline service ready"
        );

        Ok(Self::new(
            store,
            catalog,
            Arc::new(MarkdownRenderer::new()),
            &config.pipeline,
        ))
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub const fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    pub const fn tracker(&self) -> &TaskTracker {
        self.executor.tracker()
    }

    /// Stop accepting runs and wait for in-flight ones to finish.
    pub async fn shutdown(&self) {
        let tracker = self.tracker();
        tracker.close();
        if !tracker.is_empty() {
            info!(in_flight = tracker.len(), "Waiting for pipeline runs to finish");
        }
        tracker.wait().await;
    }

    // ========================================================================
    // StartPipeline
    // ========================================================================

    /// Submit a single-incident report.
    pub fn start_single(&self, request: ReportRequest) -> Result<StartResponse, PipelineError> {
        request.validate()?;
        let definition = &self.catalog.single;
        definition.check_refresh(&request.force_refresh)?;

        let incident_id = match &request.incident_id {
            // Keep the batch namespace for generated batch ids.
            Some(id) if ids::variant_of(id) != PipelineVariant::SingleIncident => {
                return Err(InvalidRequest::InvalidIncidentId(id.clone()).into());
            }
            Some(id) => id.clone(),
            None => ids::generate(definition.id_prefix, Utc::now()),
        };

        let inputs = request.inputs();
        self.executor
            .start(definition, incident_id, inputs, request.force_refresh)
    }

    /// Submit a report covering several existing incidents.
    ///
    /// Referenced incidents are snapshotted into the batch inputs before
    /// anything is persisted; unknown ids are kept as `not_found` entries.
    pub fn start_multi(&self, request: MultiReportRequest) -> Result<StartResponse, PipelineError> {
        request.validate()?;
        let definition = &self.catalog.multi;
        definition.check_refresh(&request.force_refresh)?;

        let incident_ids = request.referenced_ids();
        let incidents_data = incident_ids
            .iter()
            .map(|id| self.snapshot(id))
            .collect::<Result<Vec<_>, _>>()?;
        let missing = incidents_data.iter().filter(|i| !i.is_found()).count();
        if missing > 0 {
            warn!(missing, total = incidents_data.len(), "Batch references unknown incidents");
        }

        let inputs = PipelineInputs::Multi(BatchInputs {
            incident_ids,
            fiscal_year: request.fiscal_year,
            incidents_data,
        });
        let incident_id = ids::generate(definition.id_prefix, Utc::now());
        self.executor
            .start(definition, incident_id, inputs, request.force_refresh)
    }

    fn snapshot(&self, incident_id: &str) -> Result<ReferencedIncident, PipelineError> {
        let Some(record) = self.store.get_incident(incident_id)? else {
            return Ok(ReferencedIncident::not_found(incident_id));
        };

        let summary = self
            .store
            .get_stage_output(incident_id, stage_names::REPORT)?
            .and_then(|out| out.data.as_report().map(|r| r.executive_summary.clone()));
        let (issue_type, location) = match &record.inputs {
            PipelineInputs::Single(inputs) => {
                (Some(inputs.issue_type.clone()), Some(inputs.location.clone()))
            }
            PipelineInputs::Multi(_) => (None, None),
        };

        Ok(ReferencedIncident {
            incident_id: record.incident_id,
            status: record.status.as_str().to_string(),
            issue_type,
            location,
            summary,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_status(&self, report_id: &str) -> Result<StatusView, PipelineError> {
        self.projector.poll(report_id)
    }

    pub fn subscribe(&self, report_id: &str) -> BoxStream<'static, Result<StatusView, PipelineError>> {
        self.projector.subscribe(report_id.to_string())
    }

    fn load(&self, incident_id: &str) -> Result<IncidentRecord, PipelineError> {
        self.store
            .get_incident(incident_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("incident {incident_id}")))
    }

    fn cached_outputs(
        &self,
        record: &IncidentRecord,
    ) -> Result<BTreeMap<String, StageOutputRecord>, PipelineError> {
        let declared = self.catalog.for_variant(record.variant).stage_names();
        Ok(self
            .store
            .stage_outputs(&record.incident_id, &declared)?
            .into_iter()
            .map(|out| (out.stage.clone(), out))
            .collect())
    }

    pub fn get_incident(&self, incident_id: &str) -> Result<IncidentDetail, PipelineError> {
        let record = self.load(incident_id)?;
        let stage_outputs = self
            .cached_outputs(&record)?
            .into_iter()
            .map(|(stage, out)| (stage, StageOutputView::from(out)))
            .collect();

        Ok(IncidentDetail {
            incident_id: record.incident_id,
            variant: record.variant,
            status: record.status,
            inputs: record.inputs,
            pipeline_run: record.pipeline_run,
            stage_outputs,
            result_pointer: record.result_pointer,
            report_url: record.report_url,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Render the incident's report from cached outputs. Never runs a stage.
    pub fn get_artifact(&self, incident_id: &str) -> Result<Artifact, PipelineError> {
        let record = self.load(incident_id)?;
        let outputs = self.cached_outputs(&record)?;
        Ok(self.renderer.render(&record, &outputs)?)
    }

    /// Delete incidents created more than `retention` ago.
    pub fn purge_expired(&self, retention: chrono::Duration) -> Result<Vec<String>, PipelineError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(Vec::new());
        };
        let purged = self.store.purge_created_before(cutoff)?;
        if !purged.is_empty() {
            info!(count = purged.len(), %cutoff, "Purged expired incidents");
        }
        Ok(purged)
    }
}
