//! Research stages: cost, budget, repair plan, contractors

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{ask, finish, set_field, single_inputs, Stage, StageContext, StageError, StageOutcome};
use crate::llm::ReasoningClient;
use crate::types::{stage_names, SearchQueries, StageData};

fn planned_queries(ctx: &StageContext) -> SearchQueries {
    match ctx.output(stage_names::PLANNER) {
        Some(StageData::Planner(plan)) => plan.search_queries.clone(),
        _ => SearchQueries::default(),
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none planned)".to_string();
    }
    items
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Cost research
// ============================================================================

const COST_SCHEMA: &str = r#"{
  "material_costs": [{"item": "...", "unit": "...", "cost_low": 0, "cost_high": 0, "source": "..."}],
  "labor_costs": [{"role": "...", "hourly_rate_low": 0, "hourly_rate_high": 0}],
  "time_estimates": [{"task": "...", "hours_low": 0, "hours_high": 0}],
  "historical_benchmarks": [{"year": 2024, "avg_cost": 0, "source": "..."}],
  "total_cost_estimate": {"low": 0, "high": 0, "currency": "USD"},
  "sources": [{"url": "...", "accessed": "YYYY-MM-DD", "reliability": "high|medium|low"}]
}"#;

pub struct CostResearchStage {
    client: Arc<dyn ReasoningClient>,
}

impl CostResearchStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for CostResearchStage {
    fn name(&self) -> &'static str {
        stage_names::COST_RESEARCH
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;
        let queries = planned_queries(ctx);

        let prompt = format!(
            "You are a municipal cost research agent.\n\
             Estimate the cost of repairing a '{}' at '{}'.\n\
             Break the estimate into materials, labor and time, list historical benchmarks,\n\
             and give a total range where low <= high.\n\
             Research leads:\n{}",
            inputs.issue_type,
            inputs.location,
            bullet_list(&queries.cost_research)
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, COST_SCHEMA).await?;
        finish(self.name(), completion, 0.88)
    }
}

// ============================================================================
// Budget
// ============================================================================

const BUDGET_SCHEMA: &str = r#"{
  "fiscal_year": 2025,
  "budget_analysis": {"total_infrastructure_budget": 0, "allocated_to_issue_type": 0, "remaining": 0, "source": "..."},
  "feasibility": {"within_budget": true, "cost_as_percentage_of_allocation": 0, "recommendation": "..."},
  "grant_opportunities": [{"program": "...", "eligible": true, "max_award": 0, "deadline": "...", "source": "..."}],
  "recommendations": ["..."],
  "alternatives_if_over_budget": [{"option": "...", "reason": "..."}]
}"#;

pub struct BudgetStage {
    client: Arc<dyn ReasoningClient>,
}

impl BudgetStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for BudgetStage {
    fn name(&self) -> &'static str {
        stage_names::BUDGET
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;
        let queries = planned_queries(ctx);

        let prompt = format!(
            "You are a municipal budget analyst.\n\
             Assess whether {} can fund repair of a '{}' in fiscal year {}.\n\
             Estimated repair cost: {}\n\
             Budget data leads:\n{}\n\
             Provide the infrastructure budget, the allocation for this issue type, feasibility,\n\
             grant opportunities, recommendations, and alternatives if over budget.",
            inputs.location,
            inputs.issue_type,
            inputs.fiscal_year,
            ctx.excerpt(stage_names::COST_RESEARCH, 1000),
            bullet_list(&queries.budget_data)
        );

        let mut completion = ask(self.client.as_ref(), self.name(), prompt, BUDGET_SCHEMA).await?;
        // The analysis is always for the requested year.
        set_field(&mut completion.value, "fiscal_year", json!(inputs.fiscal_year));
        finish(self.name(), completion, 0.89)
    }
}

// ============================================================================
// Repair plan
// ============================================================================

const REPAIR_SCHEMA: &str = r#"{
  "repair_phases": [{"phase": 1, "name": "...", "description": "...", "duration_hours": 0,
                     "materials_needed": ["..."], "prerequisites": ["..."]}],
  "recommended_method": "...",
  "alternative_methods": [{"method": "...", "pros": "...", "cons": "...", "best_for": "..."}],
  "permits_required": false,
  "safety_considerations": ["..."]
}"#;

pub struct RepairPlanStage {
    client: Arc<dyn ReasoningClient>,
}

impl RepairPlanStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for RepairPlanStage {
    fn name(&self) -> &'static str {
        stage_names::REPAIR_PLAN
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;

        let prompt = format!(
            "You are a civil engineering repair planner.\n\
             Plan the repair of a '{}' at '{}'.\n\
             Number phases consecutively from 1, give non-negative durations in hours,\n\
             recommend one method and compare alternatives.\n\
             Parsed issue and location: {}\n\
             Cost research: {}",
            inputs.issue_type,
            inputs.location,
            ctx.excerpt(stage_names::PLANNER, 800),
            ctx.excerpt(stage_names::COST_RESEARCH, 800)
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, REPAIR_SCHEMA).await?;
        finish(self.name(), completion, 0.92)
    }
}

// ============================================================================
// Contractors
// ============================================================================

const CONTRACTOR_SCHEMA: &str = r#"{
  "contractors": [{"name": "...", "address": "...", "phone": "...", "rating": 4.5, "review_count": 0,
                   "services": ["..."], "estimated_response_time": "...",
                   "license": {"number": "...", "status": "active|unverified", "verified_via": "...", "verified_at": "..."},
                   "source": "..."}],
  "search_sources_used": ["..."],
  "filters_applied": ["..."]
}"#;

pub struct ContractorStage {
    client: Arc<dyn ReasoningClient>,
}

impl ContractorStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for ContractorStage {
    fn name(&self) -> &'static str {
        stage_names::CONTRACTOR
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;
        let queries = planned_queries(ctx);

        let prompt = format!(
            "You are a procurement assistant for a city public works department.\n\
             Find licensed contractors near '{}' able to repair a '{}'.\n\
             Ratings are on a 0-5 scale. Mark licenses you cannot verify as 'unverified'.\n\
             Search leads:\n{}",
            inputs.location,
            inputs.issue_type,
            bullet_list(&queries.contractor_search)
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, CONTRACTOR_SCHEMA).await?;
        finish(self.name(), completion, 0.85)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest, ReasoningError};
    use crate::types::{IncidentInputs, PipelineInputs};
    use std::sync::Mutex;

    /// Returns a fixed payload and remembers the last prompt.
    struct Scripted {
        payload: serde_json::Value,
        last_prompt: Mutex<String>,
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ReasoningError> {
            *self.last_prompt.lock().unwrap() = request.prompt;
            Ok(Completion {
                value: self.payload.clone(),
                model: "scripted".to_string(),
                tokens_used: 7,
            })
        }

        fn backend_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn ctx() -> StageContext {
        StageContext::new(
            "INC-1".to_string(),
            PipelineInputs::Single(IncidentInputs {
                issue_type: "pothole".to_string(),
                location: "Chicago, IL".to_string(),
                fiscal_year: 2026,
                image_url: None,
                image_base64: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_budget_pins_requested_fiscal_year() {
        let mut payload = crate::llm::canned_payload(stage_names::BUDGET).unwrap();
        payload["fiscal_year"] = json!(1999);
        let client = Arc::new(Scripted {
            payload,
            last_prompt: Mutex::new(String::new()),
        });

        let outcome = BudgetStage::new(client.clone()).execute(&ctx()).await.unwrap();
        match outcome.data {
            StageData::Budget(b) => assert_eq!(b.fiscal_year, 2026),
            other => panic!("unexpected variant {}", other.stage_name()),
        }
        assert_eq!(outcome.tokens_used, 7);
        assert_eq!(outcome.model_used.as_deref(), Some("scripted"));
        assert!(client.last_prompt.lock().unwrap().contains("fiscal year 2026"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_output() {
        let client = Arc::new(Scripted {
            payload: json!({"unexpected": true}),
            last_prompt: Mutex::new(String::new()),
        });
        let err = CostResearchStage::new(client).execute(&ctx()).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_contractor_prompt_uses_planned_queries() {
        let client = Arc::new(Scripted {
            payload: crate::llm::canned_payload(stage_names::CONTRACTOR).unwrap(),
            last_prompt: Mutex::new(String::new()),
        });
        let mut ctx = ctx();
        ctx.push(
            StageData::decode(
                stage_names::PLANNER,
                crate::llm::canned_payload(stage_names::PLANNER).unwrap(),
            )
            .unwrap(),
        );

        ContractorStage::new(client.clone()).execute(&ctx).await.unwrap();
        assert!(client
            .last_prompt
            .lock()
            .unwrap()
            .contains("- licensed paving contractors"));
    }
}
