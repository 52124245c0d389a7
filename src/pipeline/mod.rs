//! Pipeline orchestration
//!
//! ```text
//! submit ─► resolve id ─► COMPLETE & no refresh? ──yes──► cached result (no write)
//!                              │ no
//!                              ▼
//!                 atomic claim on the Incident Record
//!                 (create / restart / attach / conflict)
//!                              │ claimed
//!                              ▼
//!          detached run: for each declared stage, in order
//!              reusable cached output?  ── yes ─► skip, reuse data
//!              else execute ─► validate ─► upsert ─► heartbeat
//!              stage error ─► FAILED, halt
//!                              │
//!                              ▼
//!                          COMPLETE
//! ```
//!
//! Observers only ever read the persisted Incident Record, either by polling
//! or through a subscription that re-reads it on a fixed interval.

mod definition;
mod executor;
pub mod ids;
mod service;
mod status;

pub use definition::{PipelineCatalog, PipelineDefinition};
pub use executor::{PipelineExecutor, StartResponse};
pub use service::{IncidentDetail, PipelineService, StageOutputView};
pub use status::{StatusProjector, StatusView};

use crate::services::RenderError;
use crate::storage::PersistenceError;
use crate::types::InvalidRequest;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed request: {0}")]
    Malformed(#[from] InvalidRequest),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("render error: {0}")]
    Render(RenderError),
}

impl From<RenderError> for PipelineError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::MissingOutput(stage) => Self::NotFound(format!("artifact ({stage} output)")),
            other => Self::Render(other),
        }
    }
}
