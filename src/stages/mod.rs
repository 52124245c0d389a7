//! Pipeline stages
//!
//! A stage reads the incident's inputs plus the typed outputs of the stages
//! before it, asks its collaborators for one piece of the report, and
//! returns a single [`StageData`] variant with a confidence score.
//!
//! ## Single-incident
//!
//! 1. **planner** (0.95) - search queries, parsed issue, geocoded location
//! 2. **cost_research** (0.88) - materials, labor, total cost range
//! 3. **budget** (0.89) - allocation, feasibility, grants
//! 4. **repair_plan** (0.92) - numbered phases, method, permits
//! 5. **contractor** (0.85) - candidate contractors
//! 6. **validation** (0.98) - cross-checks of the stages above
//! 7. **report** (0.99) - executive summary and section narratives
//!
//! ## Multi-incident
//!
//! 1. **multi_thinking** - combined analysis of every referenced incident
//! 2. **multi_report** - batch report
//! 3. **graph_agent** - chart data for the batch
//!
//! Stages never touch storage; the executor owns persistence.

mod batch;
mod planner;
mod report;
mod research;
mod review;

pub use batch::{GraphStage, MultiThinkingStage};
pub use planner::PlannerStage;
pub use report::{artifact_url, MultiReportStage, ReportStage};
pub use research::{BudgetStage, ContractorStage, CostResearchStage, RepairPlanStage};
pub use review::ValidationStage;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::{Completion, CompletionRequest, ReasoningClient, ReasoningError};
use crate::services::Geocoder;
use crate::types::{BatchInputs, IncidentInputs, PipelineInputs, SchemaViolation, StageData};

/// Everything a stage may read.
///
/// `outputs` only ever holds stages that precede the one being executed.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub incident_id: String,
    pub inputs: PipelineInputs,
    outputs: BTreeMap<String, StageData>,
}

impl StageContext {
    pub const fn new(incident_id: String, inputs: PipelineInputs) -> Self {
        Self {
            incident_id,
            inputs,
            outputs: BTreeMap::new(),
        }
    }

    /// Make a finished (or reused) stage output visible to later stages.
    pub fn push(&mut self, data: StageData) {
        self.outputs.insert(data.stage_name().to_string(), data);
    }

    pub fn output(&self, stage: &str) -> Option<&StageData> {
        self.outputs.get(stage)
    }

    /// Names of the outputs currently visible.
    pub fn visible_stages(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub const fn single(&self) -> Option<&IncidentInputs> {
        match &self.inputs {
            PipelineInputs::Single(inputs) => Some(inputs),
            PipelineInputs::Multi(_) => None,
        }
    }

    pub const fn batch(&self) -> Option<&BatchInputs> {
        match &self.inputs {
            PipelineInputs::Multi(batch) => Some(batch),
            PipelineInputs::Single(_) => None,
        }
    }

    /// Prior output rendered as JSON for a prompt, cut to `limit` characters.
    /// Missing outputs render as `{}`.
    pub fn excerpt(&self, stage: &str, limit: usize) -> String {
        let text = self
            .output(stage)
            .map_or_else(|| "{}".to_string(), |data| data.payload().to_string());
        if text.chars().count() <= limit {
            text
        } else {
            text.chars().take(limit).collect()
        }
    }
}

/// A successful stage execution.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub data: StageData,
    pub confidence: f64,
    pub model_used: Option<String>,
    pub tokens_used: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("collaborator failed: {0}")]
    Collaborator(#[from] ReasoningError),
    #[error("unusable output: {0}")]
    InvalidOutput(#[from] SchemaViolation),
    #[error("required output from {0} is missing")]
    MissingDependency(&'static str),
    #[error("stage {stage} cannot run on {found} inputs")]
    WrongInputs {
        stage: &'static str,
        found: &'static str,
    },
}

/// One step of a pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name; doubles as the cache key and the `StageData` tag.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError>;
}

/// Ask the reasoning service for this stage's payload.
async fn ask(
    client: &dyn ReasoningClient,
    stage: &'static str,
    prompt: String,
    schema_hint: &'static str,
) -> Result<Completion, StageError> {
    let completion = client
        .complete(CompletionRequest {
            stage,
            prompt,
            schema_hint,
        })
        .await?;
    if !completion.value.is_object() {
        return Err(ReasoningError::Decode(format!("{stage}: expected a JSON object")).into());
    }
    Ok(completion)
}

/// Overwrite (or add) a top-level field of a completion payload.
fn set_field(value: &mut Value, key: &str, field: Value) {
    if let Some(map) = value.as_object_mut() {
        map.insert(key.to_string(), field);
    }
}

/// Decode a completion into this stage's variant.
fn finish(
    stage: &'static str,
    completion: Completion,
    confidence: f64,
) -> Result<StageOutcome, StageError> {
    let data = StageData::decode(stage, completion.value)?;
    Ok(StageOutcome {
        data,
        confidence,
        model_used: Some(completion.model),
        tokens_used: completion.tokens_used,
    })
}

fn single_inputs<'a>(ctx: &'a StageContext, stage: &'static str) -> Result<&'a IncidentInputs, StageError> {
    ctx.single().ok_or(StageError::WrongInputs {
        stage,
        found: "batch",
    })
}

fn batch_inputs<'a>(ctx: &'a StageContext, stage: &'static str) -> Result<&'a BatchInputs, StageError> {
    ctx.batch().ok_or(StageError::WrongInputs {
        stage,
        found: "single-incident",
    })
}

/// The seven single-incident stages, in execution order.
pub fn single_incident_stages(
    client: &Arc<dyn ReasoningClient>,
    geocoder: Option<Arc<dyn Geocoder>>,
) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(PlannerStage::new(Arc::clone(client), geocoder)),
        Arc::new(CostResearchStage::new(Arc::clone(client))),
        Arc::new(BudgetStage::new(Arc::clone(client))),
        Arc::new(RepairPlanStage::new(Arc::clone(client))),
        Arc::new(ContractorStage::new(Arc::clone(client))),
        Arc::new(ValidationStage::new(Arc::clone(client))),
        Arc::new(ReportStage::new(Arc::clone(client))),
    ]
}

/// The three multi-incident stages, in execution order.
pub fn multi_incident_stages(client: &Arc<dyn ReasoningClient>) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(MultiThinkingStage::new(Arc::clone(client))),
        Arc::new(MultiReportStage::new(Arc::clone(client))),
        Arc::new(GraphStage::new(Arc::clone(client))),
    ]
}
