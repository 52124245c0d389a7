//! Policity: incident report pipeline orchestrator
//!
//! Accepts reports of real-world infrastructure incidents and produces a
//! structured report by running a fixed sequence of analysis stages in the
//! background.
//!
//! ## Architecture
//!
//! - **Pipeline**: sequences stages, reuses cached outputs, tracks progress
//! - **Stages**: one analysis step each, consulting the reasoning backend
//! - **Storage**: incident records and per-stage output cache (sled)
//! - **API**: axum HTTP + WebSocket binding over the pipeline service

pub mod api;
pub mod background;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod services;
pub mod stages;
pub mod storage;
pub mod types;

pub use config::ServiceConfig;

pub use pipeline::{
    PipelineCatalog, PipelineDefinition, PipelineError, PipelineExecutor, PipelineService,
    StartResponse, StatusView,
};

pub use storage::{InMemoryStore, PersistenceError, PipelineStore, SledStore};

pub use types::{
    IncidentRecord, IncidentStatus, MultiReportRequest, PipelineVariant, ReportRequest,
    StageData, StageOutputRecord,
};
