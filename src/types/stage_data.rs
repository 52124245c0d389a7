//! Typed stage payloads
//!
//! Every stage produces exactly one [`StageData`] variant. Payloads are
//! decoded from the reasoning service's JSON with [`StageData::decode`] and
//! checked with [`StageData::validate`] before they are persisted, so later
//! stages read a typed contract instead of an untyped document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical stage names, shared by stage implementations, pipeline
/// definitions and storage tree names.
pub mod stage_names {
    pub const PLANNER: &str = "planner";
    pub const COST_RESEARCH: &str = "cost_research";
    pub const BUDGET: &str = "budget";
    pub const REPAIR_PLAN: &str = "repair_plan";
    pub const CONTRACTOR: &str = "contractor";
    pub const VALIDATION: &str = "validation";
    pub const REPORT: &str = "report";
    pub const MULTI_THINKING: &str = "multi_thinking";
    pub const MULTI_REPORT: &str = "multi_report";
    pub const GRAPH: &str = "graph_agent";
}

/// A payload that does not satisfy its stage's schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    #[error("{stage}: payload does not match schema: {source}")]
    Decode {
        stage: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{stage}: {reason}")]
    Invalid { stage: &'static str, reason: String },
    #[error("no schema registered for stage {0}")]
    UnknownStage(String),
}

fn invalid(stage: &'static str, reason: impl Into<String>) -> SchemaViolation {
    SchemaViolation::Invalid {
        stage,
        reason: reason.into(),
    }
}

// ============================================================================
// Shared building blocks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geospatial {
    pub coordinates: Coordinates,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default)]
    pub geocoder: String,
}

impl Geospatial {
    fn check(&self, stage: &'static str) -> Result<(), SchemaViolation> {
        let Coordinates { lat, lng } = self.coordinates;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid(stage, format!("coordinates out of range: {lat},{lng}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIssue {
    pub category: String,
    #[serde(default)]
    pub subtype: String,
    pub severity_inferred: String,
    #[serde(default)]
    pub severity_source: String,
    #[serde(default)]
    pub urgency_flags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueries {
    #[serde(default)]
    pub cost_research: Vec<String>,
    #[serde(default)]
    pub contractor_search: Vec<String>,
    #[serde(default)]
    pub budget_data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialCost {
    pub item: String,
    #[serde(default)]
    pub unit: String,
    pub cost_low: f64,
    pub cost_high: f64,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaborCost {
    pub role: String,
    pub hourly_rate_low: f64,
    pub hourly_rate_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub task: String,
    pub hours_low: f64,
    pub hours_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBenchmark {
    pub year: i32,
    pub avg_cost: f64,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRange {
    pub low: f64,
    pub high: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CostRange {
    fn check(&self, stage: &'static str) -> Result<(), SchemaViolation> {
        if !self.low.is_finite() || !self.high.is_finite() || self.low < 0.0 {
            return Err(invalid(stage, "total cost estimate must be finite and non-negative"));
        }
        if self.low > self.high {
            return Err(invalid(
                stage,
                format!("total cost estimate low {} exceeds high {}", self.low, self.high),
            ));
        }
        Ok(())
    }

    pub fn display(&self) -> String {
        format!("{} {:.0} - {:.0}", self.currency, self.low, self.high)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    #[serde(default)]
    pub accessed: String,
    #[serde(default)]
    pub reliability: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAnalysis {
    pub total_infrastructure_budget: f64,
    pub allocated_to_issue_type: f64,
    pub remaining: f64,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feasibility {
    pub within_budget: bool,
    pub cost_as_percentage_of_allocation: f64,
    #[serde(default)]
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantOpportunity {
    pub program: String,
    pub eligible: bool,
    #[serde(default)]
    pub max_award: f64,
    #[serde(default)]
    pub deadline: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAlternative {
    pub option: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPhase {
    pub phase: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration_hours: f64,
    #[serde(default)]
    pub materials_needed: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeMethod {
    pub method: String,
    #[serde(default)]
    pub pros: String,
    #[serde(default)]
    pub cons: String,
    #[serde(default)]
    pub best_for: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(default)]
    pub number: String,
    pub status: String,
    #[serde(default)]
    pub verified_via: String,
    #[serde(default)]
    pub verified_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contractor {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub estimated_response_time: String,
    pub license: LicenseInfo,
    #[serde(default)]
    pub source: String,
}

fn check_contractors(stage: &'static str, contractors: &[Contractor]) -> Result<(), SchemaViolation> {
    for c in contractors {
        if c.name.trim().is_empty() {
            return Err(invalid(stage, "contractor without a name"));
        }
        if !(0.0..=5.0).contains(&c.rating) {
            return Err(invalid(stage, format!("{}: rating {} outside 0..=5", c.name, c.rating)));
        }
    }
    Ok(())
}

fn check_phases(stage: &'static str, phases: &[RepairPhase]) -> Result<(), SchemaViolation> {
    if phases.is_empty() {
        return Err(invalid(stage, "repair plan has no phases"));
    }
    for (expected, phase) in (1..).zip(phases) {
        if phase.phase != expected {
            return Err(invalid(
                stage,
                format!("phase numbering broken: expected {expected}, found {}", phase.phase),
            ));
        }
        if !phase.duration_hours.is_finite() || phase.duration_hours < 0.0 {
            return Err(invalid(stage, format!("phase {} has a negative duration", phase.phase)));
        }
    }
    Ok(())
}

// ============================================================================
// Per-stage payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub agent: String,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub search_queries: SearchQueries,
    #[serde(default)]
    pub tasks_list: Vec<PlannedTask>,
    pub parsed_issue: ParsedIssue,
    pub geospatial: Geospatial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResearchOutput {
    #[serde(default)]
    pub material_costs: Vec<MaterialCost>,
    #[serde(default)]
    pub labor_costs: Vec<LaborCost>,
    #[serde(default)]
    pub time_estimates: Vec<TimeEstimate>,
    #[serde(default)]
    pub historical_benchmarks: Vec<HistoricalBenchmark>,
    pub total_cost_estimate: CostRange,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetOutput {
    pub fiscal_year: i32,
    pub budget_analysis: BudgetAnalysis,
    pub feasibility: Feasibility,
    #[serde(default)]
    pub grant_opportunities: Vec<GrantOpportunity>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub alternatives_if_over_budget: Vec<BudgetAlternative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPlanOutput {
    pub repair_phases: Vec<RepairPhase>,
    pub recommended_method: String,
    #[serde(default)]
    pub alternative_methods: Vec<AlternativeMethod>,
    #[serde(default)]
    pub permits_required: bool,
    #[serde(default)]
    pub safety_considerations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorOutput {
    #[serde(default)]
    pub contractors: Vec<Contractor>,
    #[serde(default)]
    pub search_sources_used: Vec<String>,
    #[serde(default)]
    pub filters_applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub overall_status: String,
    #[serde(default)]
    pub agents_reviewed: u32,
    #[serde(default)]
    pub issues_found: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub agent: String,
    pub check: String,
    pub status: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutput {
    pub validation_summary: ValidationSummary,
    #[serde(default)]
    pub checks: Vec<ValidationCheck>,
    #[serde(default)]
    pub low_confidence_sections: Vec<String>,
    #[serde(default = "default_true")]
    pub proceed_to_report: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub fiscal_year: i32,
    pub location: String,
    pub issue_type: String,
    pub report_id: String,
    #[serde(default)]
    pub report_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub estimated_cost_range: String,
    pub recommended_timeline: String,
    pub budget_feasible: bool,
    #[serde(default)]
    pub contractors_found: u32,
    #[serde(default)]
    pub grant_opportunities_available: u32,
    #[serde(default)]
    pub low_confidence_disclaimer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReliability {
    pub source: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reliability: String,
}

/// Narrative sections of a report. Sections are free-form per section but
/// every section carries a `narrative` the renderer can print.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    #[serde(default)]
    pub cost_analysis: Value,
    #[serde(default)]
    pub repair_plan: Value,
    #[serde(default)]
    pub contractors: Value,
    #[serde(default)]
    pub budget: Value,
    #[serde(default)]
    pub grants: Value,
    #[serde(default)]
    pub validation: Value,
}

impl ReportSections {
    /// `(title, narrative)` pairs for the sections that have one.
    pub fn narratives(&self) -> Vec<(&'static str, String)> {
        [
            ("Cost Analysis", &self.cost_analysis),
            ("Repair Plan", &self.repair_plan),
            ("Contractors", &self.contractors),
            ("Budget", &self.budget),
            ("Grants", &self.grants),
            ("Validation", &self.validation),
        ]
        .into_iter()
        .filter_map(|(title, section)| {
            section
                .get("narrative")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .map(|n| (title, n.to_string()))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub report_metadata: ReportMetadata,
    pub executive_summary: ExecutiveSummary,
    #[serde(default)]
    pub sections: ReportSections,
    #[serde(default)]
    pub source_reliability: Vec<SourceReliability>,
    #[serde(default)]
    pub export_formats: Vec<String>,
}

impl ReportOutput {
    fn check(&self, stage: &'static str) -> Result<(), SchemaViolation> {
        if self.report_metadata.report_id.trim().is_empty() {
            return Err(invalid(stage, "report_metadata.report_id is empty"));
        }
        if self.executive_summary.estimated_cost_range.trim().is_empty() {
            return Err(invalid(stage, "executive summary has no cost range"));
        }
        Ok(())
    }
}

/// Combined analysis across every incident in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiThinkingOutput {
    pub parsed_issue: ParsedIssue,
    pub geospatial: Geospatial,
    #[serde(default)]
    pub search_queries_used: SearchQueries,
    #[serde(default)]
    pub material_costs: Vec<MaterialCost>,
    #[serde(default)]
    pub labor_costs: Vec<LaborCost>,
    pub total_cost_estimate: CostRange,
    pub repair_phases: Vec<RepairPhase>,
    #[serde(default)]
    pub recommended_method: String,
    #[serde(default)]
    pub permits_required: bool,
    #[serde(default)]
    pub safety_considerations: Vec<String>,
    #[serde(default)]
    pub contractors: Vec<Contractor>,
    pub budget_analysis: BudgetAnalysis,
    pub feasibility: Feasibility,
    #[serde(default)]
    pub grant_opportunities: Vec<GrantOpportunity>,
    #[serde(default)]
    pub budget_recommendations: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiReportOutput {
    #[serde(default)]
    pub incident_ids: Vec<String>,
    #[serde(flatten)]
    pub report: ReportOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphOutput {
    #[serde(rename = "type", default = "default_chart_type")]
    pub chart_type: String,
    pub title: String,
    #[serde(default)]
    pub x_axis: String,
    #[serde(default)]
    pub y_axis: String,
    pub data: Vec<ChartPoint>,
}

fn default_chart_type() -> String {
    "bar".to_string()
}

// ============================================================================
// Tagged union
// ============================================================================

/// Output of one stage, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageData {
    Planner(PlannerOutput),
    CostResearch(CostResearchOutput),
    Budget(BudgetOutput),
    RepairPlan(RepairPlanOutput),
    Contractor(ContractorOutput),
    Validation(ValidationOutput),
    Report(ReportOutput),
    MultiThinking(MultiThinkingOutput),
    MultiReport(MultiReportOutput),
    #[serde(rename = "graph_agent")]
    Graph(GraphOutput),
}

impl StageData {
    /// Name of the stage this variant belongs to.
    pub const fn stage_name(&self) -> &'static str {
        match self {
            Self::Planner(_) => stage_names::PLANNER,
            Self::CostResearch(_) => stage_names::COST_RESEARCH,
            Self::Budget(_) => stage_names::BUDGET,
            Self::RepairPlan(_) => stage_names::REPAIR_PLAN,
            Self::Contractor(_) => stage_names::CONTRACTOR,
            Self::Validation(_) => stage_names::VALIDATION,
            Self::Report(_) => stage_names::REPORT,
            Self::MultiThinking(_) => stage_names::MULTI_THINKING,
            Self::MultiReport(_) => stage_names::MULTI_REPORT,
            Self::Graph(_) => stage_names::GRAPH,
        }
    }

    /// Decode an untagged payload as the schema registered for `stage`.
    pub fn decode(stage: &str, payload: Value) -> Result<Self, SchemaViolation> {
        fn typed<T: serde::de::DeserializeOwned>(
            stage: &str,
            payload: Value,
        ) -> Result<T, SchemaViolation> {
            serde_json::from_value(payload).map_err(|source| SchemaViolation::Decode {
                stage: stage.to_string(),
                source,
            })
        }

        let data = match stage {
            stage_names::PLANNER => Self::Planner(typed(stage, payload)?),
            stage_names::COST_RESEARCH => Self::CostResearch(typed(stage, payload)?),
            stage_names::BUDGET => Self::Budget(typed(stage, payload)?),
            stage_names::REPAIR_PLAN => Self::RepairPlan(typed(stage, payload)?),
            stage_names::CONTRACTOR => Self::Contractor(typed(stage, payload)?),
            stage_names::VALIDATION => Self::Validation(typed(stage, payload)?),
            stage_names::REPORT => Self::Report(typed(stage, payload)?),
            stage_names::MULTI_THINKING => Self::MultiThinking(typed(stage, payload)?),
            stage_names::MULTI_REPORT => Self::MultiReport(typed(stage, payload)?),
            stage_names::GRAPH => Self::Graph(typed(stage, payload)?),
            other => return Err(SchemaViolation::UnknownStage(other.to_string())),
        };
        Ok(data)
    }

    /// Schema checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        let stage = self.stage_name();
        match self {
            Self::Planner(p) => {
                if p.parsed_issue.category.trim().is_empty() {
                    return Err(invalid(stage, "parsed_issue.category is empty"));
                }
                p.geospatial.check(stage)
            }
            Self::CostResearch(c) => {
                for m in &c.material_costs {
                    if m.cost_low > m.cost_high {
                        return Err(invalid(stage, format!("{}: cost_low exceeds cost_high", m.item)));
                    }
                }
                c.total_cost_estimate.check(stage)
            }
            Self::Budget(b) => {
                if !b.feasibility.cost_as_percentage_of_allocation.is_finite()
                    || b.feasibility.cost_as_percentage_of_allocation < 0.0
                {
                    return Err(invalid(stage, "cost_as_percentage_of_allocation must be >= 0"));
                }
                if b.budget_analysis.total_infrastructure_budget < 0.0 {
                    return Err(invalid(stage, "total_infrastructure_budget is negative"));
                }
                Ok(())
            }
            Self::RepairPlan(r) => {
                if r.recommended_method.trim().is_empty() {
                    return Err(invalid(stage, "recommended_method is empty"));
                }
                check_phases(stage, &r.repair_phases)
            }
            Self::Contractor(c) => check_contractors(stage, &c.contractors),
            Self::Validation(v) => {
                if v.validation_summary.overall_status.trim().is_empty() {
                    return Err(invalid(stage, "validation_summary.overall_status is empty"));
                }
                Ok(())
            }
            Self::Report(r) => r.check(stage),
            Self::MultiThinking(m) => {
                m.geospatial.check(stage)?;
                m.total_cost_estimate.check(stage)?;
                check_phases(stage, &m.repair_phases)?;
                check_contractors(stage, &m.contractors)
            }
            Self::MultiReport(m) => {
                if m.incident_ids.is_empty() {
                    return Err(invalid(stage, "multi report covers no incidents"));
                }
                m.report.check(stage)
            }
            Self::Graph(g) => {
                if g.data.is_empty() {
                    return Err(invalid(stage, "chart has no data points"));
                }
                if let Some(bad) = g.data.iter().find(|p| !p.value.is_finite() || p.value < 0.0) {
                    return Err(invalid(stage, format!("{}: value {} is not a non-negative number", bad.label, bad.value)));
                }
                Ok(())
            }
        }
    }

    /// The untagged payload, as exposed to callers.
    pub fn payload(&self) -> Value {
        let tagged = serde_json::to_value(self).unwrap_or(Value::Null);
        match tagged {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn as_report(&self) -> Option<&ReportOutput> {
        match self {
            Self::Report(r) | Self::MultiReport(MultiReportOutput { report: r, .. }) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_payload() -> Value {
        json!({
            "type": "bar",
            "title": "Estimated cost by incident",
            "x_axis": "Incident",
            "y_axis": "USD",
            "data": [{"label": "INC-1", "value": 1200.0}]
        })
    }

    #[test]
    fn test_decode_matches_stage_tag() {
        let data = StageData::decode("graph_agent", graph_payload()).unwrap();
        assert_eq!(data.stage_name(), "graph_agent");
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = StageData::decode("cost_research", json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, SchemaViolation::Decode { .. }));
    }

    #[test]
    fn test_unknown_stage() {
        let err = StageData::decode("nope", json!({})).unwrap_err();
        assert!(matches!(err, SchemaViolation::UnknownStage(_)));
    }

    #[test]
    fn test_cost_range_inverted_is_invalid() {
        let data = StageData::decode(
            "cost_research",
            json!({"total_cost_estimate": {"low": 900.0, "high": 100.0}}),
        )
        .unwrap();
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_phase_numbering_checked() {
        let data = StageData::decode(
            "repair_plan",
            json!({
                "repair_phases": [
                    {"phase": 1, "name": "Prep", "duration_hours": 1.0},
                    {"phase": 3, "name": "Fill", "duration_hours": 2.0}
                ],
                "recommended_method": "hot mix"
            }),
        )
        .unwrap();
        let err = data.validate().unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_negative_chart_value_invalid() {
        let mut payload = graph_payload();
        payload["data"][0]["value"] = json!(-5.0);
        let data = StageData::decode("graph_agent", payload).unwrap();
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_payload_strips_tag() {
        let data = StageData::decode("graph_agent", graph_payload()).unwrap();
        let payload = data.payload();
        assert_eq!(payload["title"], "Estimated cost by incident");
        assert!(payload.get("stage").is_none());
    }

    #[test]
    fn test_tagged_roundtrip_keeps_variant() {
        let data = StageData::decode("graph_agent", graph_payload()).unwrap();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["stage"], "graph_agent");
        let back: StageData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }
}
