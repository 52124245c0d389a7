//! Submission payloads and the inputs stored on each Incident Record

use serde::{Deserialize, Serialize};

use super::stage_data::ExecutiveSummary;

/// Allowed fiscal years. Anything outside is treated as a typo.
pub const FISCAL_YEAR_RANGE: std::ops::RangeInclusive<i32> = 2000..=2100;

/// Longest caller-supplied incident identifier accepted.
pub const MAX_INCIDENT_ID_LEN: usize = 128;

/// Request rejected before anything was persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("fiscal_year {0} is outside 2000..=2100")]
    FiscalYearOutOfRange(i32),
    #[error("invalid incident_id {0:?}: expected 1-128 characters of [A-Za-z0-9_-]")]
    InvalidIncidentId(String),
    #[error("incident_ids must contain at least one id")]
    EmptyIncidentIds,
    #[error("unknown stage in force_refresh: {0}")]
    UnknownStage(String),
}

/// Single-incident submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub location: String,
    pub fiscal_year: i32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub force_refresh: Vec<String>,
}

impl ReportRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.issue_type.trim().is_empty() {
            return Err(InvalidRequest::MissingField("issue_type"));
        }
        if self.location.trim().is_empty() {
            return Err(InvalidRequest::MissingField("location"));
        }
        check_fiscal_year(self.fiscal_year)?;
        if let Some(id) = &self.incident_id {
            check_incident_id(id)?;
        }
        Ok(())
    }

    /// The immutable part of the request that is stored on the record.
    pub fn inputs(&self) -> PipelineInputs {
        PipelineInputs::Single(IncidentInputs {
            issue_type: self.issue_type.trim().to_string(),
            location: self.location.trim().to_string(),
            fiscal_year: self.fiscal_year,
            image_url: self.image_url.clone(),
            image_base64: self.image_base64.clone(),
        })
    }
}

/// Multi-incident (batch) submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiReportRequest {
    #[serde(default)]
    pub incident_ids: Vec<String>,
    pub fiscal_year: i32,
    #[serde(default)]
    pub force_refresh: Vec<String>,
}

impl MultiReportRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.incident_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(InvalidRequest::EmptyIncidentIds);
        }
        check_fiscal_year(self.fiscal_year)
    }

    /// Referenced ids, trimmed, blanks and duplicates removed, order kept.
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.incident_ids.len());
        for id in &self.incident_ids {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

fn check_fiscal_year(year: i32) -> Result<(), InvalidRequest> {
    if FISCAL_YEAR_RANGE.contains(&year) {
        Ok(())
    } else {
        Err(InvalidRequest::FiscalYearOutOfRange(year))
    }
}

/// Caller-supplied identifiers double as storage keys, so keep them plain.
pub fn check_incident_id(id: &str) -> Result<(), InvalidRequest> {
    let valid = !id.is_empty()
        && id.len() <= MAX_INCIDENT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(InvalidRequest::InvalidIncidentId(id.to_string()))
    }
}

/// Inputs for one real-world issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentInputs {
    pub issue_type: String,
    pub location: String,
    pub fiscal_year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// Snapshot of an incident referenced by a batch, taken at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedIncident {
    pub incident_id: String,
    /// `running`, `complete`, `failed`, or `not_found`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutiveSummary>,
}

impl ReferencedIncident {
    pub fn not_found(incident_id: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            status: "not_found".to_string(),
            issue_type: None,
            location: None,
            summary: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.status != "not_found"
    }
}

/// Inputs for a batch of previously submitted incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInputs {
    pub incident_ids: Vec<String>,
    pub fiscal_year: i32,
    #[serde(default)]
    pub incidents_data: Vec<ReferencedIncident>,
}

/// The submitted request payload, immutable after the record is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineInputs {
    Single(IncidentInputs),
    Multi(BatchInputs),
}

impl PipelineInputs {
    pub const fn fiscal_year(&self) -> i32 {
        match self {
            Self::Single(i) => i.fiscal_year,
            Self::Multi(b) => b.fiscal_year,
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Single(i) => i.location.clone(),
            Self::Multi(b) => {
                let mut places: Vec<&str> = b
                    .incidents_data
                    .iter()
                    .filter_map(|i| i.location.as_deref())
                    .collect();
                places.dedup();
                if places.is_empty() {
                    "Multiple locations".to_string()
                } else {
                    places.join("; ")
                }
            }
        }
    }

    pub fn issue_type(&self) -> String {
        match self {
            Self::Single(i) => i.issue_type.clone(),
            Self::Multi(_) => "multiple".to_string(),
        }
    }
}
