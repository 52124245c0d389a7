//! Report stages
//!
//! The reasoning service writes the narrative; identity fields in
//! `report_metadata` always come from the incident itself.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ask, batch_inputs, finish, set_field, single_inputs, Stage, StageContext, StageError, StageOutcome};
use crate::config::defaults::REPORT_URL_BASE;
use crate::llm::ReasoningClient;
use crate::types::{stage_names, StageData};

const REPORT_SCHEMA: &str = r#"{
  "report_metadata": {"generated_at": "...", "fiscal_year": 2025, "location": "...", "issue_type": "...", "report_id": "..."},
  "executive_summary": {"estimated_cost_range": "USD low - high", "recommended_timeline": "...", "budget_feasible": true,
                        "contractors_found": 0, "grant_opportunities_available": 0, "low_confidence_disclaimer": false},
  "sections": {"cost_analysis": {"narrative": "..."}, "repair_plan": {"narrative": "..."},
               "contractors": {"narrative": "..."}, "budget": {"narrative": "..."},
               "grants": {"narrative": "..."}, "validation": {"narrative": "..."}},
  "source_reliability": [{"source": "...", "type": "...", "reliability": "high|medium|low"}],
  "export_formats": ["markdown"]
}"#;

/// Where the rendered artifact for `incident_id` can be downloaded.
pub fn artifact_url(incident_id: &str) -> String {
    format!("{REPORT_URL_BASE}/{incident_id}/artifact")
}

fn stamp_metadata(value: &mut Value, ctx: &StageContext) {
    let metadata = json!({
        "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "fiscal_year": ctx.inputs.fiscal_year(),
        "location": ctx.inputs.location(),
        "issue_type": ctx.inputs.issue_type(),
        "report_id": ctx.incident_id,
        "report_url": artifact_url(&ctx.incident_id),
    });
    set_field(value, "report_metadata", metadata);
}

// ============================================================================
// Single incident
// ============================================================================

pub struct ReportStage {
    client: Arc<dyn ReasoningClient>,
}

impl ReportStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &'static str {
        stage_names::REPORT
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;

        let prompt = format!(
            "You are an infrastructure report writer.\n\
             Compile the final report for a '{}' at '{}' for fiscal year {}.\n\
             Write an executive summary and a short narrative per section. If the validation\n\
             flagged low-confidence sections, set low_confidence_disclaimer.\n\
             Cost data: {}\n\
             Contractor data: {}\n\
             Budget data: {}\n\
             Repair plan: {}\n\
             Validation: {}",
            inputs.issue_type,
            inputs.location,
            inputs.fiscal_year,
            ctx.excerpt(stage_names::COST_RESEARCH, 1000),
            ctx.excerpt(stage_names::CONTRACTOR, 1000),
            ctx.excerpt(stage_names::BUDGET, 1000),
            ctx.excerpt(stage_names::REPAIR_PLAN, 1000),
            ctx.excerpt(stage_names::VALIDATION, 500)
        );

        let mut completion = ask(self.client.as_ref(), self.name(), prompt, REPORT_SCHEMA).await?;
        stamp_metadata(&mut completion.value, ctx);
        finish(self.name(), completion, 0.99)
    }
}

// ============================================================================
// Batch
// ============================================================================

pub struct MultiReportStage {
    client: Arc<dyn ReasoningClient>,
}

impl MultiReportStage {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for MultiReportStage {
    fn name(&self) -> &'static str {
        stage_names::MULTI_REPORT
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let batch = batch_inputs(ctx, self.name())?;
        if !matches!(
            ctx.output(stage_names::MULTI_THINKING),
            Some(StageData::MultiThinking(_))
        ) {
            return Err(StageError::MissingDependency(stage_names::MULTI_THINKING));
        }

        let prompt = format!(
            "You are an infrastructure report writer.\n\
             Compile one report covering {} incidents for fiscal year {}.\n\
             Combined analysis: {}",
            batch.incident_ids.len(),
            batch.fiscal_year,
            ctx.excerpt(stage_names::MULTI_THINKING, 4000)
        );

        let mut completion = ask(self.client.as_ref(), self.name(), prompt, REPORT_SCHEMA).await?;
        stamp_metadata(&mut completion.value, ctx);
        set_field(&mut completion.value, "incident_ids", json!(batch.incident_ids));
        finish(self.name(), completion, 0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TemplateClient;
    use crate::types::{BatchInputs, IncidentInputs, PipelineInputs};

    #[tokio::test]
    async fn test_report_metadata_comes_from_incident() {
        let ctx = StageContext::new(
            "INC-20250101-0001A2B".to_string(),
            PipelineInputs::Single(IncidentInputs {
                issue_type: "pothole".to_string(),
                location: "Chicago, IL".to_string(),
                fiscal_year: 2025,
                image_url: None,
                image_base64: None,
            }),
        );
        let outcome = ReportStage::new(Arc::new(TemplateClient::new()))
            .execute(&ctx)
            .await
            .unwrap();
        let report = outcome.data.as_report().unwrap();
        assert_eq!(report.report_metadata.report_id, "INC-20250101-0001A2B");
        assert_eq!(report.report_metadata.fiscal_year, 2025);
        assert_eq!(report.report_metadata.location, "Chicago, IL");
        assert!(report.report_metadata.report_url.ends_with("/INC-20250101-0001A2B/artifact"));
    }

    #[tokio::test]
    async fn test_multi_report_requires_thinking_output() {
        let ctx = StageContext::new(
            "MULTI-INC-20250101-0001A2B".to_string(),
            PipelineInputs::Multi(BatchInputs {
                incident_ids: vec!["INC-1".to_string()],
                fiscal_year: 2025,
                incidents_data: Vec::new(),
            }),
        );
        let err = MultiReportStage::new(Arc::new(TemplateClient::new()))
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingDependency("multi_thinking")));
    }
}
