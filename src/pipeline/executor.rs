//! Pipeline executor
//!
//! Claims an incident with one atomic read-modify-write, then drives its
//! stages in a detached task tracked by a [`TaskTracker`]. The task owns the
//! record through its `run_id`; every write it makes checks that it still
//! owns the record, so a run that was declared abandoned and replaced stops
//! at its next write instead of racing the new one. That includes stage
//! output writes: the heartbeat is refreshed right before each upsert.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{PipelineDefinition, PipelineError};
use crate::stages::{artifact_url, StageContext, StageError, StageOutcome};
use crate::storage::{PersistenceError, PipelineStore};
use crate::types::{
    IncidentRecord, IncidentStatus, PipelineInputs, SchemaViolation, StageOutputRecord,
    StageResolution,
};

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartResponse {
    pub report_id: String,
    pub incident_id: String,
    pub status: IncidentStatus,
    pub progress: u8,
    pub cache_hit: bool,
    pub agents_skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StartResponse {
    fn running(record: &IncidentRecord) -> Self {
        Self {
            report_id: record.incident_id.clone(),
            incident_id: record.incident_id.clone(),
            status: record.status,
            progress: record.progress(),
            cache_hit: false,
            agents_skipped: record.pipeline_run.agents_skipped.clone(),
            result: None,
        }
    }
}

/// What the claim step decided.
enum Claim {
    Created,
    Restarted,
    /// A live run already owns the incident.
    Attached,
    /// Finished between the idempotency read and the claim.
    AlreadyComplete,
    Conflict(String),
}

#[derive(Clone)]
pub struct PipelineExecutor {
    store: Arc<dyn PipelineStore>,
    tracker: TaskTracker,
    stale_after: chrono::Duration,
}

impl PipelineExecutor {
    pub fn new(store: Arc<dyn PipelineStore>, stale_after: chrono::Duration) -> Self {
        Self {
            store,
            tracker: TaskTracker::new(),
            stale_after,
        }
    }

    /// Tracker holding every detached run.
    pub const fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Submit `incident_id` to `definition`.
    ///
    /// Returns synchronously; stages run in a detached task.
    pub fn start(
        &self,
        definition: &Arc<PipelineDefinition>,
        incident_id: String,
        inputs: PipelineInputs,
        force_refresh: Vec<String>,
    ) -> Result<StartResponse, PipelineError> {
        let mut force_refresh = force_refresh;
        force_refresh.sort_unstable();
        force_refresh.dedup();

        if force_refresh.is_empty() {
            if let Some(existing) = self.store.get_incident(&incident_id)? {
                if existing.status == IncidentStatus::Complete
                    && existing.variant == definition.variant
                {
                    info!(incident_id = %incident_id, "Incident already complete, returning cached result");
                    return self.cached_response(definition, &existing);
                }
            }
        }

        let now = Utc::now();
        let run_id = Uuid::new_v4();
        let variant = definition.variant;
        let stale_after = self.stale_after;
        let refresh_requested = !force_refresh.is_empty();
        let mut claim = Claim::Attached;

        let record = self
            .store
            .update_incident(&incident_id, &mut |current| match current {
                None => {
                    claim = Claim::Created;
                    Some(IncidentRecord::new_running(
                        incident_id.clone(),
                        variant,
                        inputs.clone(),
                        run_id,
                        now,
                    ))
                }
                Some(rec) if rec.variant != variant => {
                    claim = Claim::Conflict(format!(
                        "incident {} belongs to the {} pipeline",
                        rec.incident_id, rec.variant
                    ));
                    None
                }
                Some(rec) if rec.status == IncidentStatus::Complete && !refresh_requested => {
                    claim = Claim::AlreadyComplete;
                    None
                }
                Some(rec)
                    if rec.status == IncidentStatus::Running
                        && !rec.is_abandoned(now, stale_after) =>
                {
                    claim = if refresh_requested {
                        Claim::Conflict(format!(
                            "incident {} is running; force_refresh is not accepted until it finishes",
                            rec.incident_id
                        ))
                    } else {
                        Claim::Attached
                    };
                    None
                }
                Some(rec) => {
                    let mut next = rec.clone();
                    next.restart(run_id, now);
                    claim = Claim::Restarted;
                    Some(next)
                }
            })?
            .ok_or_else(|| PipelineError::NotFound(incident_id.clone()))?;

        match claim {
            Claim::Created | Claim::Restarted => {
                info!(
                    incident_id = %record.incident_id,
                    %run_id,
                    variant = %variant,
                    restarted = matches!(claim, Claim::Restarted),
                    force_refresh = ?force_refresh,
                    "Pipeline run started"
                );
                self.spawn_run(definition, &record, run_id, force_refresh);
                Ok(StartResponse::running(&record))
            }
            Claim::Attached => {
                info!(incident_id = %record.incident_id, "Incident already running, not starting a second run");
                Ok(StartResponse::running(&record))
            }
            Claim::AlreadyComplete => self.cached_response(definition, &record),
            Claim::Conflict(reason) => Err(PipelineError::Conflict(reason)),
        }
    }

    /// Idempotent-resume answer. Reads only.
    fn cached_response(
        &self,
        definition: &PipelineDefinition,
        record: &IncidentRecord,
    ) -> Result<StartResponse, PipelineError> {
        let result_stage = record
            .result_pointer
            .as_deref()
            .unwrap_or(definition.result_stage);
        let result = self
            .store
            .get_stage_output(&record.incident_id, result_stage)?
            .map_or_else(|| json!({}), |out| out.data.payload());

        Ok(StartResponse {
            report_id: record.incident_id.clone(),
            incident_id: record.incident_id.clone(),
            status: IncidentStatus::Complete,
            progress: 100,
            cache_hit: true,
            agents_skipped: definition
                .stage_names()
                .into_iter()
                .map(String::from)
                .collect(),
            result: Some(result),
        })
    }

    fn spawn_run(
        &self,
        definition: &Arc<PipelineDefinition>,
        record: &IncidentRecord,
        run_id: Uuid,
        force_refresh: Vec<String>,
    ) {
        let run = Run {
            store: Arc::clone(&self.store),
            definition: Arc::clone(definition),
            incident_id: record.incident_id.clone(),
            inputs: record.inputs.clone(),
            run_id,
            force_refresh,
        };
        let span = info_span!("pipeline_run", incident_id = %record.incident_id, %run_id);
        self.tracker.spawn(run.drive().instrument(span));
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Failed,
    /// Another run took ownership of the record.
    Superseded,
}

/// State of one detached run.
struct Run {
    store: Arc<dyn PipelineStore>,
    definition: Arc<PipelineDefinition>,
    incident_id: String,
    inputs: PipelineInputs,
    run_id: Uuid,
    force_refresh: Vec<String>,
}

/// Boundary checks on a stage result before it is persisted.
fn accept(stage: &'static str, outcome: StageOutcome) -> Result<StageOutcome, StageError> {
    if outcome.data.stage_name() != stage {
        return Err(SchemaViolation::Invalid {
            stage,
            reason: format!("produced {} output", outcome.data.stage_name()),
        }
        .into());
    }
    if !(0.0..=1.0).contains(&outcome.confidence) {
        return Err(SchemaViolation::Invalid {
            stage,
            reason: format!("confidence {} outside [0, 1]", outcome.confidence),
        }
        .into());
    }
    outcome.data.validate()?;
    Ok(outcome)
}

impl Run {
    async fn drive(self) {
        match self.execute_stages().await {
            Ok(RunEnd::Completed | RunEnd::Failed) => {}
            Ok(RunEnd::Superseded) => {
                warn!("Incident taken over by a newer run, stopping");
            }
            Err(e) => {
                error!(error = %e, "Persistence failure during pipeline run");
                if let Err(e) = self.fail(None, &format!("persistence failure: {e}")) {
                    error!(error = %e, "Could not mark incident as failed");
                }
            }
        }
    }

    async fn execute_stages(&self) -> Result<RunEnd, PersistenceError> {
        // Counts of invalidated outputs, carried into their re-run.
        let mut carried: HashMap<&str, u32> = HashMap::new();
        for stage in &self.force_refresh {
            if let Some(prev) = self.store.delete_stage_output(&self.incident_id, stage)? {
                debug!(stage = %stage, run_count = prev.run_count, "Invalidated cached stage output");
                carried.insert(stage.as_str(), prev.run_count);
            }
        }

        let mut ctx = StageContext::new(self.incident_id.clone(), self.inputs.clone());

        for stage in self.definition.stages() {
            let name = stage.name();

            if let Some(cached) = self.reusable_output(name)? {
                info!(stage = name, confidence = cached.confidence, "Reusing cached stage output");
                ctx.push(cached.data);
                if !self.mark(name, StageResolution::Skipped)? {
                    return Ok(RunEnd::Superseded);
                }
                continue;
            }

            debug!(stage = name, "Executing stage");
            let started = Instant::now();
            let outcome = stage.execute(&ctx).await.and_then(|o| accept(name, o));
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(outcome) => {
                    // A superseded run must not touch the cache.
                    if !self.touch()? {
                        return Ok(RunEnd::Superseded);
                    }
                    let stored = self.store.upsert_stage_output(StageOutputRecord {
                        incident_id: self.incident_id.clone(),
                        stage: name.to_string(),
                        data: outcome.data.clone(),
                        confidence: outcome.confidence,
                        executed_at: Utc::now(),
                        duration_ms,
                        model_used: outcome.model_used,
                        tokens_used: outcome.tokens_used,
                        run_count: carried.get(name).copied().unwrap_or(0),
                    })?;
                    info!(
                        stage = name,
                        confidence = outcome.confidence,
                        duration_ms,
                        run_count = stored.run_count,
                        "Stage completed"
                    );
                    ctx.push(outcome.data);
                    if !self.mark(name, StageResolution::Completed)? {
                        return Ok(RunEnd::Superseded);
                    }
                }
                Err(e) => {
                    warn!(stage = name, duration_ms, error = %e, "Stage failed, halting pipeline");
                    return if self.fail(Some(name), &format!("{name}: {e}"))? {
                        Ok(RunEnd::Failed)
                    } else {
                        Ok(RunEnd::Superseded)
                    };
                }
            }
        }

        if self.complete()? {
            Ok(RunEnd::Completed)
        } else {
            Ok(RunEnd::Superseded)
        }
    }

    fn reusable_output(&self, stage: &str) -> Result<Option<StageOutputRecord>, PersistenceError> {
        if self.force_refresh.iter().any(|s| s == stage) {
            return Ok(None);
        }
        Ok(self
            .store
            .get_stage_output(&self.incident_id, stage)?
            .filter(|out| out.is_reusable() && out.data.stage_name() == stage))
    }

    /// Apply `change` to the record if this run still owns it. Returns
    /// whether the write happened.
    fn write_owned(
        &self,
        change: impl Fn(&mut IncidentRecord),
    ) -> Result<bool, PersistenceError> {
        let run_id = self.run_id;
        let mut owned = false;
        self.store.update_incident(&self.incident_id, &mut |current| {
            owned = false;
            let rec = current?;
            if !rec.is_owned_by(run_id) || rec.status != IncidentStatus::Running {
                return None;
            }
            owned = true;
            let mut next = rec.clone();
            let now = Utc::now();
            change(&mut next);
            next.last_heartbeat = Some(now);
            next.updated_at = now;
            Some(next)
        })?;
        Ok(owned)
    }

    /// Refresh the heartbeat. Returns whether this run still owns the record.
    fn touch(&self) -> Result<bool, PersistenceError> {
        self.write_owned(|_| {})
    }

    fn mark(&self, stage: &str, resolution: StageResolution) -> Result<bool, PersistenceError> {
        self.write_owned(|rec| rec.pipeline_run.record(stage, resolution))
    }

    fn fail(&self, stage: Option<&str>, message: &str) -> Result<bool, PersistenceError> {
        let reached: Vec<&str> = stage.map_or_else(Vec::new, |stage| {
            self.definition
                .stage_names()
                .into_iter()
                .take_while(|name| *name != stage)
                .collect()
        });
        self.write_owned(|rec| {
            if let Some(stage) = stage {
                rec.pipeline_run.halt(stage, &reached);
            }
            rec.status = IncidentStatus::Failed;
            rec.error = Some(message.to_string());
        })
    }

    fn complete(&self) -> Result<bool, PersistenceError> {
        let result_stage = self.definition.result_stage;
        let report_url = artifact_url(&self.incident_id);
        let completed = self.write_owned(|rec| {
            let now = Utc::now();
            let elapsed = (now - rec.pipeline_run.started_at).num_milliseconds();
            rec.pipeline_run.completed_at = Some(now);
            rec.pipeline_run.total_duration_ms = Some(u64::try_from(elapsed).unwrap_or(0));
            rec.status = IncidentStatus::Complete;
            rec.result_pointer = Some(result_stage.to_string());
            rec.report_url = Some(report_url.clone());
            rec.error = None;
        })?;
        if completed {
            info!(result_stage, "Pipeline complete");
        }
        Ok(completed)
    }
}
