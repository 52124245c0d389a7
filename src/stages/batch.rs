//! Batch stages: combined analysis and chart data

use async_trait::async_trait;
use std::sync::Arc;

use super::{ask, batch_inputs, finish, Stage, StageContext, StageError, StageOutcome};
use crate::llm::{ReasoningClient, ReasoningError};
use crate::types::{stage_names, StageData};

const BATCH_CONFIDENCE: f64 = 0.9;

const THINKING_SCHEMA: &str = r#"{
  "parsed_issue": {"category": "...", "subtype": "...", "severity_inferred": "...", "severity_source": "...", "urgency_flags": []},
  "geospatial": {"coordinates": {"lat": 0, "lng": 0}, "neighborhood": "...", "geocoder": "..."},
  "search_queries_used": {"cost_research": [], "contractor_search": [], "budget_data": []},
  "material_costs": [{"item": "...", "unit": "...", "cost_low": 0, "cost_high": 0, "source": "..."}],
  "labor_costs": [{"role": "...", "hourly_rate_low": 0, "hourly_rate_high": 0}],
  "total_cost_estimate": {"low": 0, "high": 0, "currency": "USD"},
  "repair_phases": [{"phase": 1, "name": "...", "description": "...", "duration_hours": 0}],
  "recommended_method": "...",
  "permits_required": false,
  "safety_considerations": [],
  "contractors": [],
  "budget_analysis": {"total_infrastructure_budget": 0, "allocated_to_issue_type": 0, "remaining": 0, "source": "..."},
  "feasibility": {"within_budget": true, "cost_as_percentage_of_allocation": 0, "recommendation": "..."},
  "grant_opportunities": [],
  "budget_recommendations": [],
  "sources": []
}"#;

const GRAPH_SCHEMA: &str = r#"{
  "type": "bar",
  "title": "...",
  "x_axis": "...",
  "y_axis": "...",
  "data": [{"label": "...", "value": 0}]
}"#;

pub struct MultiThinkingStage {
    client: Arc<dyn ReasoningClient>,
}

impl MultiThinkingStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for MultiThinkingStage {
    fn name(&self) -> &'static str {
        stage_names::MULTI_THINKING
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let batch = batch_inputs(ctx, self.name())?;
        let incidents = serde_json::to_string(&batch.incidents_data)
            .map_err(|e| ReasoningError::Decode(e.to_string()))?;
        let found = batch.incidents_data.iter().filter(|i| i.is_found()).count();

        let prompt = format!(
            "You are a municipal infrastructure analyst planning one combined repair program.\n\
             Fiscal year: {}. {} of {} referenced incidents have data; ignore the rest.\n\
             Produce a combined analysis: dominant issue, a representative location, total cost\n\
             range (low <= high), phases numbered from 1, contractors, budget feasibility.\n\
             Incidents: {}",
            batch.fiscal_year,
            found,
            batch.incident_ids.len(),
            incidents
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, THINKING_SCHEMA).await?;
        finish(self.name(), completion, BATCH_CONFIDENCE)
    }
}

pub struct GraphStage {
    client: Arc<dyn ReasoningClient>,
}

impl GraphStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for GraphStage {
    fn name(&self) -> &'static str {
        stage_names::GRAPH
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        batch_inputs(ctx, self.name())?;
        if !matches!(
            ctx.output(stage_names::MULTI_THINKING),
            Some(StageData::MultiThinking(_))
        ) {
            return Err(StageError::MissingDependency(stage_names::MULTI_THINKING));
        }

        let prompt = format!(
            "You are a municipal financial analyst.\n\
             Produce bar chart data strictly supported by the analysis below. All values are\n\
             non-negative numbers; do not invent figures.\n\
             Analysis: {}",
            ctx.excerpt(stage_names::MULTI_THINKING, 4000)
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, GRAPH_SCHEMA).await?;
        finish(self.name(), completion, BATCH_CONFIDENCE)
    }
}
