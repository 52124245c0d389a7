//! Offline reasoning backend
//!
//! Returns a fixed, schema-valid payload per stage. Report metadata is left
//! as placeholders; the report stages overwrite it with the incident's own
//! identity before persisting.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Completion, CompletionRequest, ReasoningClient, ReasoningError};
use crate::types::stage_names;

const MODEL_NAME: &str = "template";

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateClient;

impl TemplateClient {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReasoningClient for TemplateClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ReasoningError> {
        let value = canned_payload(request.stage).ok_or_else(|| {
            ReasoningError::Unavailable(format!("no template for stage {}", request.stage))
        })?;
        Ok(Completion {
            value,
            model: MODEL_NAME.to_string(),
            tokens_used: 0,
        })
    }

    fn backend_name(&self) -> &'static str {
        MODEL_NAME
    }
}

fn geospatial() -> Value {
    json!({
        "coordinates": {"lat": 0.0, "lng": 0.0},
        "neighborhood": "Unknown",
        "geocoder": "fallback"
    })
}

fn parsed_issue() -> Value {
    json!({
        "category": "roadway",
        "subtype": "surface defect",
        "severity_inferred": "moderate",
        "severity_source": "default",
        "urgency_flags": []
    })
}

fn repair_phases() -> Value {
    json!([
        {"phase": 1, "name": "Site preparation", "description": "Set traffic control and clear debris",
         "duration_hours": 1.0, "materials_needed": ["cones"], "prerequisites": []},
        {"phase": 2, "name": "Repair", "description": "Remove damaged material and patch",
         "duration_hours": 3.0, "materials_needed": ["hot mix asphalt"], "prerequisites": ["Site preparation"]},
        {"phase": 3, "name": "Inspection", "description": "Compact, inspect and reopen",
         "duration_hours": 1.0, "materials_needed": [], "prerequisites": ["Repair"]}
    ])
}

fn contractors() -> Value {
    json!([{
        "name": "Municipal Public Works",
        "rating": 4.0,
        "services": ["paving", "patching"],
        "estimated_response_time": "1-2 weeks",
        "license": {"status": "unverified", "verified_via": "template"},
        "source": "template"
    }])
}

fn report(summary_cost: &str) -> Value {
    json!({
        "report_metadata": {
            "generated_at": "",
            "fiscal_year": 0,
            "location": "",
            "issue_type": "",
            "report_id": "pending"
        },
        "executive_summary": {
            "estimated_cost_range": summary_cost,
            "recommended_timeline": "1-2 weeks",
            "budget_feasible": true,
            "contractors_found": 1,
            "grant_opportunities_available": 0,
            "low_confidence_disclaimer": true
        },
        "sections": {
            "cost_analysis": {"narrative": "Costs are indicative placeholders produced without live research."},
            "repair_plan": {"narrative": "Standard three-phase repair: prepare, repair, inspect."},
            "budget": {"narrative": "Budget feasibility assumed pending city budget data."}
        },
        "source_reliability": [{"source": "template", "type": "offline", "reliability": "low"}],
        "export_formats": ["markdown"]
    })
}

/// Canned payload for `stage`, or `None` for stages with no template.
pub fn canned_payload(stage: &str) -> Option<Value> {
    let value = match stage {
        stage_names::PLANNER => json!({
            "search_queries": {
                "cost_research": ["repair unit cost"],
                "contractor_search": ["licensed paving contractors"],
                "budget_data": ["city infrastructure budget"]
            },
            "tasks_list": [
                {"agent": "cost_research", "priority": 1},
                {"agent": "budget", "priority": 2},
                {"agent": "repair_plan", "priority": 3},
                {"agent": "contractor", "priority": 4}
            ],
            "parsed_issue": parsed_issue(),
            "geospatial": geospatial()
        }),
        stage_names::COST_RESEARCH => json!({
            "material_costs": [{"item": "hot mix asphalt", "unit": "ton", "cost_low": 90.0, "cost_high": 150.0, "source": "template"}],
            "labor_costs": [{"role": "crew", "hourly_rate_low": 45.0, "hourly_rate_high": 75.0}],
            "time_estimates": [{"task": "repair", "hours_low": 3.0, "hours_high": 6.0}],
            "total_cost_estimate": {"low": 500.0, "high": 1500.0, "currency": "USD"},
            "sources": []
        }),
        stage_names::BUDGET => json!({
            "fiscal_year": 0,
            "budget_analysis": {
                "total_infrastructure_budget": 0.0,
                "allocated_to_issue_type": 0.0,
                "remaining": 0.0,
                "source": "unavailable"
            },
            "feasibility": {
                "within_budget": true,
                "cost_as_percentage_of_allocation": 0.0,
                "recommendation": "Confirm allocation with the budget office"
            },
            "recommendations": ["Schedule under routine maintenance"]
        }),
        stage_names::REPAIR_PLAN => json!({
            "repair_phases": repair_phases(),
            "recommended_method": "Full-depth patch",
            "permits_required": false,
            "safety_considerations": ["Traffic control during work"]
        }),
        stage_names::CONTRACTOR => json!({
            "contractors": contractors(),
            "search_sources_used": ["template"],
            "filters_applied": []
        }),
        stage_names::VALIDATION => json!({
            "validation_summary": {"overall_status": "passed_with_warnings", "agents_reviewed": 5, "issues_found": 1},
            "checks": [{"agent": "cost_research", "check": "sources_present", "status": "warning",
                        "notes": "No live sources consulted"}],
            "low_confidence_sections": ["cost_research"],
            "proceed_to_report": true
        }),
        stage_names::REPORT => report("USD 500 - 1500"),
        stage_names::MULTI_THINKING => json!({
            "parsed_issue": parsed_issue(),
            "geospatial": geospatial(),
            "total_cost_estimate": {"low": 1000.0, "high": 4000.0, "currency": "USD"},
            "repair_phases": repair_phases(),
            "recommended_method": "Batch repair by a single crew",
            "contractors": contractors(),
            "budget_analysis": {
                "total_infrastructure_budget": 0.0,
                "allocated_to_issue_type": 0.0,
                "remaining": 0.0
            },
            "feasibility": {"within_budget": true, "cost_as_percentage_of_allocation": 0.0}
        }),
        stage_names::MULTI_REPORT => {
            let mut value = report("USD 1000 - 4000");
            value["incident_ids"] = json!([]);
            value
        }
        stage_names::GRAPH => json!({
            "type": "bar",
            "title": "Estimated cost by phase",
            "x_axis": "Phase",
            "y_axis": "USD",
            "data": [
                {"label": "Site preparation", "value": 300.0},
                {"label": "Repair", "value": 2500.0},
                {"label": "Inspection", "value": 200.0}
            ]
        }),
        _ => return None,
    };
    Some(value)
}
