//! Incident report artifacts
//!
//! Rendering reads cached stage outputs only; a missing final output means
//! there is no artifact yet, never that a stage should run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::types::{
    stage_names, GraphOutput, IncidentRecord, PipelineVariant, ReportOutput, StageData,
    StageOutputRecord,
};

/// A rendered document ready to be served as a download.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no cached output for stage {0}")]
    MissingOutput(&'static str),
    #[error("cached output for {0} is not a report")]
    NotAReport(&'static str),
    #[error("formatting failed: {0}")]
    Format(#[from] std::fmt::Error),
}

pub trait ArtifactRenderer: Send + Sync {
    fn render(
        &self,
        incident: &IncidentRecord,
        outputs: &BTreeMap<String, StageOutputRecord>,
    ) -> Result<Artifact, RenderError>;
}

/// Plain Markdown rendering of the final report.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub const fn new() -> Self {
        Self
    }
}

fn report_of<'a>(
    outputs: &'a BTreeMap<String, StageOutputRecord>,
    stage: &'static str,
) -> Result<&'a ReportOutput, RenderError> {
    outputs
        .get(stage)
        .ok_or(RenderError::MissingOutput(stage))?
        .data
        .as_report()
        .ok_or(RenderError::NotAReport(stage))
}

fn write_report(out: &mut String, incident_id: &str, report: &ReportOutput) -> std::fmt::Result {
    let meta = &report.report_metadata;
    let summary = &report.executive_summary;

    writeln!(out, "# Municipal Infrastructure Report")?;
    writeln!(out)?;
    writeln!(out, "- **Incident:** {incident_id}")?;
    if !meta.location.is_empty() {
        writeln!(out, "- **Location:** {}", meta.location)?;
    }
    if !meta.issue_type.is_empty() {
        writeln!(out, "- **Issue:** {}", meta.issue_type)?;
    }
    writeln!(out, "- **Fiscal year:** {}", meta.fiscal_year)?;
    writeln!(out, "- **Generated:** {}", meta.generated_at)?;
    writeln!(out)?;

    writeln!(out, "## Executive Summary")?;
    writeln!(out)?;
    writeln!(out, "| Item | Value |")?;
    writeln!(out, "|------|-------|")?;
    writeln!(out, "| Estimated cost | {} |", summary.estimated_cost_range)?;
    writeln!(out, "| Recommended timeline | {} |", summary.recommended_timeline)?;
    writeln!(
        out,
        "| Within budget | {} |",
        if summary.budget_feasible { "yes" } else { "no" }
    )?;
    writeln!(out, "| Contractors found | {} |", summary.contractors_found)?;
    writeln!(
        out,
        "| Grant opportunities | {} |",
        summary.grant_opportunities_available
    )?;
    if summary.low_confidence_disclaimer {
        writeln!(out)?;
        writeln!(
            out,
            "> Parts of this report are based on low-confidence data and should be verified."
        )?;
    }

    for (title, narrative) in report.sections.narratives() {
        writeln!(out)?;
        writeln!(out, "## {title}")?;
        writeln!(out)?;
        writeln!(out, "{narrative}")?;
    }

    if !report.source_reliability.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Sources")?;
        writeln!(out)?;
        for src in &report.source_reliability {
            writeln!(out, "- {} ({}, reliability: {})", src.source, src.kind, src.reliability)?;
        }
    }
    Ok(())
}

fn write_chart(out: &mut String, chart: &GraphOutput) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "## {}", chart.title)?;
    writeln!(out)?;
    let x = if chart.x_axis.is_empty() { "Label" } else { &chart.x_axis };
    let y = if chart.y_axis.is_empty() { "Value" } else { &chart.y_axis };
    writeln!(out, "| {x} | {y} |")?;
    writeln!(out, "|---|---|")?;
    for point in &chart.data {
        writeln!(out, "| {} | {:.2} |", point.label, point.value)?;
    }
    Ok(())
}

impl ArtifactRenderer for MarkdownRenderer {
    fn render(
        &self,
        incident: &IncidentRecord,
        outputs: &BTreeMap<String, StageOutputRecord>,
    ) -> Result<Artifact, RenderError> {
        let mut out = String::new();

        match incident.variant {
            PipelineVariant::SingleIncident => {
                let report = report_of(outputs, stage_names::REPORT)?;
                write_report(&mut out, &incident.incident_id, report)?;
            }
            PipelineVariant::MultiIncident => {
                let report = report_of(outputs, stage_names::MULTI_REPORT)?;
                write_report(&mut out, &incident.incident_id, report)?;

                if let Some(StageData::MultiReport(multi)) =
                    outputs.get(stage_names::MULTI_REPORT).map(|o| &o.data)
                {
                    writeln!(out)?;
                    writeln!(out, "## Incidents Covered")?;
                    writeln!(out)?;
                    for id in &multi.incident_ids {
                        writeln!(out, "- {id}")?;
                    }
                }
                // The chart is optional; a batch halted after the report
                // still renders.
                if let Some(StageData::Graph(chart)) =
                    outputs.get(stage_names::GRAPH).map(|o| &o.data)
                {
                    write_chart(&mut out, chart)?;
                }
            }
        }

        Ok(Artifact {
            bytes: out.into_bytes(),
            content_type: "text/markdown; charset=utf-8",
            file_name: format!("{}.md", incident.incident_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::canned_payload;
    use crate::types::{IncidentInputs, PipelineInputs};
    use chrono::Utc;
    use uuid::Uuid;

    fn incident() -> IncidentRecord {
        IncidentRecord::new_running(
            "INC-20250101-0001A2B",
            PipelineVariant::SingleIncident,
            PipelineInputs::Single(IncidentInputs {
                issue_type: "pothole".to_string(),
                location: "Chicago, IL".to_string(),
                fiscal_year: 2025,
                image_url: None,
                image_base64: None,
            }),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    fn output(stage: &str) -> StageOutputRecord {
        StageOutputRecord {
            incident_id: "INC-20250101-0001A2B".to_string(),
            stage: stage.to_string(),
            data: StageData::decode(stage, canned_payload(stage).unwrap()).unwrap(),
            confidence: 0.99,
            executed_at: Utc::now(),
            duration_ms: 1,
            model_used: None,
            tokens_used: 0,
            run_count: 1,
        }
    }

    #[test]
    fn test_renders_single_report() {
        let mut outputs = BTreeMap::new();
        outputs.insert("report".to_string(), output("report"));

        let artifact = MarkdownRenderer::new().render(&incident(), &outputs).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();
        assert!(text.contains("# Municipal Infrastructure Report"));
        assert!(text.contains("USD 500 - 1500"));
        assert!(text.contains("## Repair Plan"));
        assert_eq!(artifact.file_name, "INC-20250101-0001A2B.md");
    }

    #[test]
    fn test_missing_report_is_not_rendered() {
        let mut outputs = BTreeMap::new();
        outputs.insert("planner".to_string(), output("planner"));

        let err = MarkdownRenderer::new().render(&incident(), &outputs).unwrap_err();
        assert!(matches!(err, RenderError::MissingOutput("report")));
    }
}
