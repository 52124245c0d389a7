//! Pipeline Scenario Tests
//!
//! Drives `PipelineService` end to end against scripted stages and the
//! in-memory store: fresh runs, idempotent resume, stage reuse, forced
//! refresh, fail-fast halting, context accumulation and subscriptions.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use policity::config::{PipelineConfig, ReasoningProvider, ServiceConfig};
use policity::llm::{canned_payload, ReasoningError};
use policity::pipeline::{
    ids, PipelineCatalog, PipelineDefinition, PipelineError, PipelineService, StatusView,
};
use policity::services::MarkdownRenderer;
use policity::stages::{Stage, StageContext, StageError, StageOutcome};
use policity::storage::InMemoryStore;
use policity::types::{
    stage_names, IncidentInputs, IncidentRecord, IncidentStatus, MultiReportRequest,
    PipelineInputs, PipelineVariant, ReportRequest, StageData,
};

const SINGLE: [&str; 7] = [
    stage_names::PLANNER,
    stage_names::COST_RESEARCH,
    stage_names::BUDGET,
    stage_names::REPAIR_PLAN,
    stage_names::CONTRACTOR,
    stage_names::VALIDATION,
    stage_names::REPORT,
];

const MULTI: [&str; 3] = [
    stage_names::MULTI_THINKING,
    stage_names::MULTI_REPORT,
    stage_names::GRAPH,
];

// ============================================================================
// Scripted stage
// ============================================================================

/// Stage double returning the offline payload for `emits`, counting calls
/// and recording which prior outputs it could see.
struct ScriptedStage {
    name: &'static str,
    emits: &'static str,
    confidence: f64,
    failing: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedStage {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            emits: name,
            confidence: 0.9,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    fn emitting(mut self, other: &'static str) -> Self {
        self.emits = other;
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = ctx.visible_stages().map(String::from).collect();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReasoningError::Unavailable(format!("{} backend down", self.name)).into());
        }

        let payload = canned_payload(self.emits).expect("offline payload for every stage");
        Ok(StageOutcome {
            data: StageData::decode(self.emits, payload)?,
            confidence: self.confidence,
            model_used: Some("scripted".to_string()),
            tokens_used: 1,
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    service: PipelineService,
    stages: Vec<Arc<ScriptedStage>>,
}

impl Harness {
    fn new(single: Vec<ScriptedStage>) -> Self {
        let stages: Vec<Arc<ScriptedStage>> = single.into_iter().map(Arc::new).collect();
        let as_dyn = |stages: &[Arc<ScriptedStage>]| -> Vec<Arc<dyn Stage>> {
            stages.iter().map(|s| Arc::clone(s) as Arc<dyn Stage>).collect()
        };
        let multi: Vec<Arc<ScriptedStage>> = MULTI
            .iter()
            .map(|name| Arc::new(ScriptedStage::new(name)))
            .collect();

        let catalog = PipelineCatalog::new(
            PipelineDefinition::single_incident(as_dyn(&stages)),
            PipelineDefinition::multi_incident(as_dyn(&multi)),
        );
        let config = PipelineConfig {
            status_poll_interval_ms: 10,
            stale_run_secs: 600,
        };
        let service = PipelineService::new(
            Arc::new(InMemoryStore::new()),
            catalog,
            Arc::new(MarkdownRenderer::new()),
            &config,
        );
        Self { service, stages }
    }

    fn default_stages() -> Vec<ScriptedStage> {
        SINGLE.iter().map(|name| ScriptedStage::new(name)).collect()
    }

    fn stage(&self, name: &str) -> &ScriptedStage {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .expect("declared stage")
    }

    fn run_count(&self, incident_id: &str, stage: &str) -> Option<u32> {
        self.service
            .store()
            .get_stage_output(incident_id, stage)
            .unwrap()
            .map(|out| out.run_count)
    }

    fn record(&self, incident_id: &str) -> IncidentRecord {
        self.service
            .store()
            .get_incident(incident_id)
            .unwrap()
            .expect("incident exists")
    }

    /// Write `record` straight to the store.
    fn seed(&self, record: IncidentRecord) {
        let id = record.incident_id.clone();
        self.service
            .store()
            .update_incident(&id, &mut |_| Some(record.clone()))
            .unwrap();
    }

    /// Submit and wait for the run to reach a terminal state.
    async fn run(&self, request: ReportRequest) -> StatusView {
        let started = self.service.start_single(request).unwrap();
        wait_terminal(&self.service, &started.incident_id).await
    }
}

fn pothole(incident_id: Option<&str>, force_refresh: &[&str]) -> ReportRequest {
    ReportRequest {
        incident_id: incident_id.map(String::from),
        issue_type: "pothole".to_string(),
        location: "Chicago, IL".to_string(),
        fiscal_year: 2025,
        image_url: None,
        image_base64: None,
        force_refresh: force_refresh.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

async fn wait_terminal(service: &PipelineService, incident_id: &str) -> StatusView {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = service.get_status(incident_id).unwrap();
            if view.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline did not reach a terminal state")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_fresh_submission_runs_every_stage() {
    let h = Harness::new(Harness::default_stages());

    let started = h.service.start_single(pothole(None, &[])).unwrap();
    assert_eq!(started.status, IncidentStatus::Running);
    assert!(!started.cache_hit);
    assert!(started.result.is_none());
    assert!(ids::is_generated(&started.incident_id), "bad id {}", started.incident_id);
    assert!(started.incident_id.starts_with("INC-"));
    assert_eq!(started.report_id, started.incident_id);

    let wire = serde_json::to_value(&started).unwrap();
    assert_eq!(wire["status"], "running");

    let done = wait_terminal(&h.service, &started.incident_id).await;
    assert_eq!(done.status, IncidentStatus::Complete);
    assert_eq!(done.progress, 100);
    assert_eq!(done.agents_completed, names(&SINGLE));
    assert!(done.agents_skipped.is_empty());
    assert!(done.agents_failed.is_empty());
    assert!(!done.cache_hit);
    assert!(done.current_stage.is_none());
    assert!(done.result.is_some());

    for name in SINGLE {
        assert_eq!(h.stage(name).calls(), 1, "{name}");
        assert_eq!(h.run_count(&started.incident_id, name), Some(1), "{name}");
    }

    let record = h.record(&started.incident_id);
    assert_eq!(record.result_pointer.as_deref(), Some(stage_names::REPORT));
    assert!(record.pipeline_run.total_duration_ms.is_some());
    assert!(record
        .report_url
        .as_deref()
        .is_some_and(|url| url.ends_with(&format!("{}/artifact", started.incident_id))));
}

#[tokio::test]
async fn test_resubmitting_complete_incident_is_idempotent() {
    let h = Harness::new(Harness::default_stages());
    let first = h.run(pothole(None, &[])).await;
    let before = h.record(&first.incident_id);

    let again = h
        .service
        .start_single(pothole(Some(&first.incident_id), &[]))
        .unwrap();

    assert_eq!(again.status, IncidentStatus::Complete);
    assert_eq!(again.progress, 100);
    assert!(again.cache_hit);
    assert_eq!(again.agents_skipped, names(&SINGLE));
    assert_eq!(again.result, first.result);

    for name in SINGLE {
        assert_eq!(h.stage(name).calls(), 1, "{name} re-invoked");
    }
    assert_eq!(h.record(&first.incident_id), before, "record was mutated");
}

#[tokio::test]
async fn test_force_refresh_reruns_only_named_stage() {
    let h = Harness::new(Harness::default_stages());
    let first = h.run(pothole(None, &[])).await;
    let id = first.incident_id.clone();

    let started = h
        .service
        .start_single(pothole(Some(&id), &[stage_names::COST_RESEARCH]))
        .unwrap();
    assert_eq!(started.status, IncidentStatus::Running);
    assert!(!started.cache_hit);

    let done = wait_terminal(&h.service, &id).await;
    assert_eq!(done.status, IncidentStatus::Complete);
    assert_eq!(done.agents_completed, names(&[stage_names::COST_RESEARCH]));
    assert_eq!(done.agents_skipped.len(), SINGLE.len() - 1);
    assert!(!done.agents_skipped.contains(&stage_names::COST_RESEARCH.to_string()));
    assert!(done.cache_hit);

    assert_eq!(h.run_count(&id, stage_names::COST_RESEARCH), Some(2));
    assert_eq!(h.stage(stage_names::COST_RESEARCH).calls(), 2);
    for name in SINGLE.iter().filter(|n| **n != stage_names::COST_RESEARCH) {
        assert_eq!(h.run_count(&id, name), Some(1), "{name}");
        assert_eq!(h.stage(name).calls(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_duplicate_refresh_names_rerun_once() {
    let h = Harness::new(Harness::default_stages());
    let id = h.run(pothole(None, &[])).await.incident_id;

    h.run(pothole(
        Some(&id),
        &[stage_names::BUDGET, stage_names::BUDGET],
    ))
    .await;

    assert_eq!(h.run_count(&id, stage_names::BUDGET), Some(2));
}

#[tokio::test]
async fn test_low_confidence_outputs_are_not_reused() {
    let mut stages = Harness::default_stages();
    stages[2] = ScriptedStage::new(stage_names::BUDGET).with_confidence(0.59);
    stages[4] = ScriptedStage::new(stage_names::CONTRACTOR).with_confidence(0.6);
    let h = Harness::new(stages);

    let id = h.run(pothole(None, &[])).await.incident_id;
    let done = h.run(pothole(Some(&id), &[stage_names::PLANNER])).await;

    assert_eq!(
        done.agents_completed,
        names(&[stage_names::PLANNER, stage_names::BUDGET])
    );
    assert!(done.agents_skipped.contains(&stage_names::CONTRACTOR.to_string()));
    assert_eq!(h.run_count(&id, stage_names::BUDGET), Some(2));
    assert_eq!(h.run_count(&id, stage_names::CONTRACTOR), Some(1));
}

#[tokio::test]
async fn test_stage_failure_halts_pipeline() {
    let mut stages = Harness::default_stages();
    stages[2] = ScriptedStage::new(stage_names::BUDGET).failing();
    let h = Harness::new(stages);

    let done = h.run(pothole(None, &[])).await;
    let id = done.incident_id.clone();

    assert_eq!(done.status, IncidentStatus::Failed);
    assert_eq!(
        done.agents_completed,
        names(&[stage_names::PLANNER, stage_names::COST_RESEARCH])
    );
    assert_eq!(done.agents_failed, names(&[stage_names::BUDGET]));
    assert_eq!(done.current_stage.as_deref(), Some(stage_names::BUDGET));
    assert_eq!(done.progress, 50);
    assert!(done.result.is_none());
    assert!(done
        .error
        .as_deref()
        .is_some_and(|msg| msg.contains("budget")));

    for name in &SINGLE[2..] {
        assert_eq!(h.run_count(&id, name), None, "{name} output was written");
    }
    for name in &SINGLE[3..] {
        assert_eq!(h.stage(name).calls(), 0, "{name} ran after the failure");
    }
}

#[tokio::test]
async fn test_failed_incident_resumes_from_cache() {
    let mut stages = Harness::default_stages();
    stages[2] = ScriptedStage::new(stage_names::BUDGET).failing();
    let h = Harness::new(stages);

    let id = h.run(pothole(None, &[])).await.incident_id;
    let created_at = h.record(&id).created_at;

    h.stage(stage_names::BUDGET).set_failing(false);
    let done = h.run(pothole(Some(&id), &[])).await;

    assert_eq!(done.status, IncidentStatus::Complete);
    assert!(done.agents_failed.is_empty());
    assert_eq!(
        done.agents_skipped,
        names(&[stage_names::PLANNER, stage_names::COST_RESEARCH])
    );
    assert_eq!(done.agents_completed, names(&SINGLE[2..]));
    assert_eq!(h.stage(stage_names::PLANNER).calls(), 1);
    assert_eq!(h.stage(stage_names::BUDGET).calls(), 2);
    assert_eq!(h.run_count(&id, stage_names::BUDGET), Some(1));

    let record = h.record(&id);
    assert_eq!(record.created_at, created_at);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_resumed_run_failing_earlier_drops_stale_entries() {
    let mut stages = Harness::default_stages();
    stages[2] = ScriptedStage::new(stage_names::BUDGET).failing();
    let h = Harness::new(stages);

    let first = h.run(pothole(None, &[])).await;
    let id = first.incident_id.clone();
    assert_eq!(first.agents_failed, names(&[stage_names::BUDGET]));

    h.stage(stage_names::BUDGET).set_failing(false);
    h.stage(stage_names::PLANNER).set_failing(true);
    let done = h.run(pothole(Some(&id), &[stage_names::PLANNER])).await;

    assert_eq!(done.status, IncidentStatus::Failed);
    assert!(done.agents_completed.is_empty(), "{:?}", done.agents_completed);
    assert!(done.agents_skipped.is_empty(), "{:?}", done.agents_skipped);
    assert_eq!(done.agents_failed, names(&[stage_names::PLANNER]));
    assert_eq!(done.current_stage.as_deref(), Some(stage_names::PLANNER));
    assert_eq!(h.stage(stage_names::COST_RESEARCH).calls(), 1);
    assert_eq!(h.stage(stage_names::BUDGET).calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_confidence_is_a_stage_failure() {
    let mut stages = Harness::default_stages();
    stages[3] = ScriptedStage::new(stage_names::REPAIR_PLAN).with_confidence(1.5);
    let h = Harness::new(stages);

    let done = h.run(pothole(None, &[])).await;

    assert_eq!(done.status, IncidentStatus::Failed);
    assert_eq!(done.agents_failed, names(&[stage_names::REPAIR_PLAN]));
    assert_eq!(h.run_count(&done.incident_id, stage_names::REPAIR_PLAN), None);
}

#[tokio::test]
async fn test_mismatched_output_variant_is_a_stage_failure() {
    let mut stages = Harness::default_stages();
    stages[1] = ScriptedStage::new(stage_names::COST_RESEARCH).emitting(stage_names::PLANNER);
    let h = Harness::new(stages);

    let done = h.run(pothole(None, &[])).await;

    assert_eq!(done.status, IncidentStatus::Failed);
    assert_eq!(done.agents_failed, names(&[stage_names::COST_RESEARCH]));
}

#[tokio::test]
async fn test_stages_only_see_earlier_outputs() {
    let h = Harness::new(Harness::default_stages());
    let id = h.run(pothole(None, &[])).await.incident_id;

    for (k, name) in SINGLE.iter().enumerate() {
        let mut expected = names(&SINGLE[..k]);
        expected.sort();
        assert_eq!(h.stage(name).last_seen(), expected, "{name}");
    }

    // Reused outputs still flow into the context of later stages.
    h.run(pothole(Some(&id), &[stage_names::REPORT])).await;
    let mut before_report = names(&SINGLE[..6]);
    before_report.sort();
    assert_eq!(h.stage(stage_names::REPORT).last_seen(), before_report);
}

// ============================================================================
// Concurrent submissions
// ============================================================================

#[tokio::test]
async fn test_submission_while_running_attaches_or_conflicts() {
    let gate = Arc::new(Semaphore::new(0));
    let mut stages = Harness::default_stages();
    stages[0] = ScriptedStage::new(stage_names::PLANNER).gated(Arc::clone(&gate));
    let h = Harness::new(stages);

    let started = h.service.start_single(pothole(Some("chi-0001"), &[])).unwrap();
    assert_eq!(started.status, IncidentStatus::Running);

    let attached = h.service.start_single(pothole(Some("chi-0001"), &[])).unwrap();
    assert_eq!(attached.status, IncidentStatus::Running);
    assert!(!attached.cache_hit);

    let refresh = h
        .service
        .start_single(pothole(Some("chi-0001"), &[stage_names::BUDGET]));
    assert!(matches!(refresh, Err(PipelineError::Conflict(_))));

    gate.add_permits(1);
    let done = wait_terminal(&h.service, "chi-0001").await;
    assert_eq!(done.status, IncidentStatus::Complete);
    assert_eq!(h.stage(stage_names::PLANNER).calls(), 1);
    assert_eq!(h.run_count("chi-0001", stage_names::PLANNER), Some(1));
}

#[tokio::test]
async fn test_abandoned_run_is_restarted() {
    let h = Harness::new(Harness::default_stages());
    let stale = Utc::now() - chrono::Duration::hours(1);
    let abandoned_run = Uuid::new_v4();
    h.seed(IncidentRecord::new_running(
        "chi-stale",
        PipelineVariant::SingleIncident,
        PipelineInputs::Single(IncidentInputs {
            issue_type: "pothole".to_string(),
            location: "Chicago, IL".to_string(),
            fiscal_year: 2025,
            image_url: None,
            image_base64: None,
        }),
        abandoned_run,
        stale,
    ));

    let done = h.run(pothole(Some("chi-stale"), &[])).await;

    assert_eq!(done.status, IncidentStatus::Complete);
    let record = h.record("chi-stale");
    assert!(!record.is_owned_by(abandoned_run));
    assert_eq!(record.created_at, stale);
}

#[tokio::test]
async fn test_superseded_run_writes_no_stage_output() {
    let gate = Arc::new(Semaphore::new(0));
    let mut stages = Harness::default_stages();
    stages[1] = ScriptedStage::new(stage_names::COST_RESEARCH).gated(Arc::clone(&gate));
    let h = Harness::new(stages);

    h.service.start_single(pothole(Some("chi-taken"), &[])).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while h.stage(stage_names::COST_RESEARCH).calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cost_research never started");

    // Another run takes the record over while cost_research is in flight.
    let new_owner = Uuid::new_v4();
    h.service
        .store()
        .update_incident("chi-taken", &mut |current| {
            let mut next = current?.clone();
            next.run_id = Some(new_owner);
            next.last_heartbeat = Some(Utc::now());
            Some(next)
        })
        .unwrap();

    gate.add_permits(1);
    h.service.shutdown().await;

    assert_eq!(h.run_count("chi-taken", stage_names::PLANNER), Some(1));
    assert_eq!(h.run_count("chi-taken", stage_names::COST_RESEARCH), None);
    for name in &SINGLE[2..] {
        assert_eq!(h.stage(name).calls(), 0, "{name} ran after the takeover");
    }

    let record = h.record("chi-taken");
    assert!(record.is_owned_by(new_owner));
    assert_eq!(record.status, IncidentStatus::Running);
    assert_eq!(
        record.pipeline_run.agents_completed,
        names(&[stage_names::PLANNER])
    );
}

// ============================================================================
// Malformed requests
// ============================================================================

#[tokio::test]
async fn test_malformed_requests_persist_nothing() {
    let h = Harness::new(Harness::default_stages());

    let mut missing_type = pothole(Some("chi-bad-1"), &[]);
    missing_type.issue_type = "  ".to_string();
    let unknown_stage = pothole(Some("chi-bad-2"), &[stage_names::GRAPH]);
    let batch_prefix = pothole(Some("MULTI-INC-20250101-0000001"), &[]);
    let mut bad_year = pothole(Some("chi-bad-3"), &[]);
    bad_year.fiscal_year = 1999;

    for (request, id) in [
        (missing_type, "chi-bad-1"),
        (unknown_stage, "chi-bad-2"),
        (batch_prefix, "MULTI-INC-20250101-0000001"),
        (bad_year, "chi-bad-3"),
    ] {
        let result = h.service.start_single(request);
        assert!(matches!(result, Err(PipelineError::Malformed(_))), "{id}");
        assert!(h.service.store().get_incident(id).unwrap().is_none(), "{id}");
    }

    let empty_batch = MultiReportRequest {
        incident_ids: vec![" ".to_string()],
        fiscal_year: 2025,
        force_refresh: Vec::new(),
    };
    assert!(matches!(
        h.service.start_multi(empty_batch),
        Err(PipelineError::Malformed(_))
    ));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_subscription_ends_after_terminal_view() {
    let h = Harness::new(Harness::default_stages());
    let started = h.service.start_single(pothole(None, &[])).unwrap();

    let views: Vec<_> = tokio::time::timeout(
        Duration::from_secs(10),
        h.service.subscribe(&started.incident_id).collect::<Vec<_>>(),
    )
    .await
    .expect("subscription never ended");

    let views: Vec<StatusView> = views.into_iter().map(Result::unwrap).collect();
    let (last, earlier) = views.split_last().expect("at least one view");
    assert_eq!(last.status, IncidentStatus::Complete);
    assert!(earlier.iter().all(|v| v.status == IncidentStatus::Running));
}

#[tokio::test]
async fn test_subscription_to_unknown_report_yields_one_error() {
    let h = Harness::new(Harness::default_stages());

    let items: Vec<_> = h.service.subscribe("INC-20250101-0000000").collect().await;

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn test_incident_detail_and_artifact() {
    let h = Harness::new(Harness::default_stages());
    let id = h.run(pothole(None, &[])).await.incident_id;

    let detail = h.service.get_incident(&id).unwrap();
    assert_eq!(detail.status, IncidentStatus::Complete);
    assert_eq!(detail.stage_outputs.len(), SINGLE.len());
    assert!(detail.stage_outputs.values().all(|out| out.run_count == 1));
    assert_eq!(detail.result_pointer.as_deref(), Some(stage_names::REPORT));

    let artifact = h.service.get_artifact(&id).unwrap();
    assert!(artifact.content_type.starts_with("text/markdown"));
    assert_eq!(artifact.file_name, format!("{id}.md"));
    assert!(!artifact.bytes.is_empty());

    assert!(matches!(
        h.service.get_incident("INC-nope"),
        Err(PipelineError::NotFound(_))
    ));
    assert!(matches!(
        h.service.get_artifact("INC-nope"),
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_artifact_of_failed_incident_is_not_found() {
    let mut stages = Harness::default_stages();
    stages[6] = ScriptedStage::new(stage_names::REPORT).failing();
    let h = Harness::new(stages);

    let id = h.run(pothole(None, &[])).await.incident_id;

    assert!(matches!(
        h.service.get_artifact(&id),
        Err(PipelineError::NotFound(_))
    ));
    assert_eq!(h.stage(stage_names::REPORT).calls(), 1);
}

#[tokio::test]
async fn test_retention_purges_old_incidents() {
    let h = Harness::new(Harness::default_stages());
    let id = h.run(pothole(None, &[])).await.incident_id;

    let kept = h.service.purge_expired(chrono::Duration::days(365)).unwrap();
    assert!(kept.is_empty());

    let purged = h.service.purge_expired(chrono::Duration::zero()).unwrap();
    assert_eq!(purged, vec![id.clone()]);
    assert!(h.service.store().get_incident(&id).unwrap().is_none());
    assert_eq!(h.run_count(&id, stage_names::PLANNER), None);
}

// ============================================================================
// Multi-incident pipeline with the offline backend
// ============================================================================

fn offline_service() -> PipelineService {
    let mut config = ServiceConfig::default();
    config.reasoning.provider = ReasoningProvider::Template;
    config.geocoder.enabled = false;
    PipelineService::from_config(&config, Arc::new(InMemoryStore::new())).unwrap()
}

#[tokio::test]
async fn test_multi_incident_report_over_existing_incidents() {
    let service = offline_service();

    let single = service.start_single(pothole(None, &[])).unwrap();
    let single_done = wait_terminal(&service, &single.incident_id).await;
    assert_eq!(single_done.status, IncidentStatus::Complete, "{:?}", single_done.error);

    let batch = service
        .start_multi(MultiReportRequest {
            incident_ids: vec![single.incident_id.clone(), "INC-missing".to_string()],
            fiscal_year: 2025,
            force_refresh: Vec::new(),
        })
        .unwrap();
    assert!(batch.incident_id.starts_with("MULTI-INC-"));
    assert!(ids::is_generated(&batch.incident_id));

    let done = wait_terminal(&service, &batch.incident_id).await;
    assert_eq!(done.status, IncidentStatus::Complete, "{:?}", done.error);
    assert_eq!(done.agents_completed, names(&MULTI));
    let result = done.result.expect("batch result");
    assert_eq!(
        result["incident_ids"],
        serde_json::json!([single.incident_id, "INC-missing"])
    );

    let detail = service.get_incident(&batch.incident_id).unwrap();
    assert_eq!(detail.variant, PipelineVariant::MultiIncident);
    assert_eq!(detail.result_pointer.as_deref(), Some(stage_names::MULTI_REPORT));
    let PipelineInputs::Multi(inputs) = detail.inputs else {
        panic!("batch incident stored single inputs");
    };
    assert_eq!(inputs.incidents_data.len(), 2);
    assert!(inputs.incidents_data[0].is_found());
    assert!(!inputs.incidents_data[1].is_found());

    let artifact = service.get_artifact(&batch.incident_id).unwrap();
    let text = String::from_utf8(artifact.bytes).unwrap();
    assert!(text.contains(&single.incident_id));

    service.shutdown().await;
}
