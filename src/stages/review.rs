//! Validation stage: cross-checks the research stages before reporting

use async_trait::async_trait;
use std::sync::Arc;

use super::{ask, finish, single_inputs, Stage, StageContext, StageError, StageOutcome};
use crate::llm::ReasoningClient;
use crate::types::stage_names;

const SCHEMA: &str = r#"{
  "validation_summary": {"overall_status": "passed|passed_with_warnings|failed", "agents_reviewed": 4, "issues_found": 0},
  "checks": [{"agent": "...", "check": "...", "status": "pass|warning|fail", "notes": "..."}],
  "low_confidence_sections": ["..."],
  "proceed_to_report": true
}"#;

const REVIEWED: [&str; 4] = [
    stage_names::COST_RESEARCH,
    stage_names::CONTRACTOR,
    stage_names::BUDGET,
    stage_names::REPAIR_PLAN,
];

pub struct ValidationStage {
    client: Arc<dyn ReasoningClient>,
}

impl ValidationStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        stage_names::VALIDATION
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;

        let reviewed: String = REVIEWED
            .iter()
            .map(|stage| format!("{stage}: {}\n", ctx.excerpt(stage, 500)))
            .collect();
        let prompt = format!(
            "You are a quality reviewer for municipal repair reports about a '{}' at '{}'.\n\
             Check that cost ranges are realistic, licenses are verified, and budget sources are\n\
             accessible. Flag low-confidence sections and decide whether the report can proceed.\n\
             {reviewed}",
            inputs.issue_type, inputs.location
        );

        let completion = ask(self.client.as_ref(), self.name(), prompt, SCHEMA).await?;
        finish(self.name(), completion, 0.98)
    }
}
