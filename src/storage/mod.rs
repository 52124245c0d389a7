//! Pipeline persistence
//!
//! The document store is the only synchronization point between the request
//! path, background runs and status readers. Everything goes through
//! [`PipelineStore`]:
//! - `SledStore`: embedded sled database, one tree for incidents and one
//!   tree per stage for cached outputs
//! - `InMemoryStore`: lock-protected maps for tests and throwaway runs
//!
//! Implementations never hold a lock across an await point; every method is
//! synchronous and every mutation is a single atomic step.

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};

use crate::types::{IncidentRecord, StageOutputRecord};

/// Closure used by [`PipelineStore::update_incident`].
///
/// Receives the current record (if any) and returns the replacement, or
/// `None` to leave the stored value untouched. It may run more than once if
/// the backend retries a compare-and-swap, so it must not have side effects
/// beyond writing to its own captured state.
pub type IncidentUpdate<'a> = dyn FnMut(Option<&IncidentRecord>) -> Option<IncidentRecord> + 'a;

/// Storage backend for Incident Records and stage outputs.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait PipelineStore: Send + Sync {
    /// Fetch one Incident Record.
    fn get_incident(&self, incident_id: &str) -> Result<Option<IncidentRecord>, PersistenceError>;

    /// Atomic find-and-update of one Incident Record.
    ///
    /// Returns the record as stored after the update (unchanged when the
    /// closure returned `None`).
    fn update_incident(
        &self,
        incident_id: &str,
        update: &mut IncidentUpdate<'_>,
    ) -> Result<Option<IncidentRecord>, PersistenceError>;

    /// Fetch the cached output of `stage` for `incident_id`.
    fn get_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError>;

    /// Upsert a stage output, incrementing `run_count` in the same step.
    ///
    /// The count continues from the stored output when there is one and from
    /// `record.run_count` otherwise, so a caller that deleted an output can
    /// carry its count over. The stored value is returned.
    fn upsert_stage_output(
        &self,
        record: StageOutputRecord,
    ) -> Result<StageOutputRecord, PersistenceError>;

    /// Remove a cached stage output. Returns the removed output, if any.
    fn delete_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError>;

    /// Delete every incident created before `cutoff`, with its stage
    /// outputs. Returns the removed incident ids.
    fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PersistenceError>;

    /// Cheap reachability probe for health reporting.
    fn ping(&self) -> Result<(), PersistenceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Cached outputs for `stages`, in the given order, skipping gaps.
    fn stage_outputs(
        &self,
        incident_id: &str,
        stages: &[&str],
    ) -> Result<Vec<StageOutputRecord>, PersistenceError> {
        let mut outputs = Vec::with_capacity(stages.len());
        for stage in stages {
            if let Some(out) = self.get_stage_output(incident_id, stage)? {
                outputs.push(out);
            }
        }
        Ok(outputs)
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("not found")]
    NotFound,
}

impl From<sled::Error> for PersistenceError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Insert or replace a record, for seeding stores in tests.
#[cfg(test)]
pub(crate) fn seed_incident(store: &dyn PipelineStore, record: IncidentRecord) {
    let id = record.incident_id.clone();
    store
        .update_incident(&id, &mut |_| Some(record.clone()))
        .unwrap();
}
