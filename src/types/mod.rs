//! Shared data types for the report pipeline
//!
//! - `incident`: Incident Record, run bookkeeping, status state machine
//! - `stage_output`: persisted per-(incident, stage) cache entries
//! - `stage_data`: typed, validated payload for every stage
//! - `request`: submission payloads and the immutable stored inputs

pub mod incident;
pub mod request;
pub mod stage_data;
pub mod stage_output;

pub use incident::{IncidentRecord, IncidentStatus, PipelineRun, PipelineVariant, StageResolution};
pub use request::{
    BatchInputs, IncidentInputs, InvalidRequest, MultiReportRequest, PipelineInputs,
    ReferencedIncident, ReportRequest,
};
pub use stage_data::*;
pub use stage_output::StageOutputRecord;
