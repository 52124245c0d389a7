//! sled-backed pipeline store
//!
//! Layout:
//! - tree `incidents`: `incident_id` -> JSON `IncidentRecord`
//! - tree `stage_output:<stage>`: `incident_id` -> JSON `StageOutputRecord`
//!
//! One tree per stage keeps `(incident_id, stage)` unique by construction.
//! Every mutation uses `update_and_fetch`, sled's compare-and-swap loop, so
//! concurrent writers never interleave within a record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use super::{IncidentUpdate, PersistenceError, PipelineStore};
use crate::types::{IncidentRecord, StageOutputRecord};

const INCIDENTS_TREE: &str = "incidents";
const STAGE_TREE_PREFIX: &str = "stage_output:";

/// Persistent store for Incident Records and stage outputs.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    incidents: sled::Tree,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = sled::open(path_ref).context("Failed to open pipeline store")?;

        tracing::info!("Pipeline store opened at {:?}", path_ref);

        Self::from_db(db)
    }

    /// A store that lives only as long as the process (tests, dry runs).
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary pipeline store")?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let incidents = db
            .open_tree(INCIDENTS_TREE)
            .context("Failed to open incidents tree")?;
        Ok(Self {
            db: Arc::new(db),
            incidents,
        })
    }

    fn stage_tree(&self, stage: &str) -> Result<sled::Tree, PersistenceError> {
        Ok(self.db.open_tree(format!("{STAGE_TREE_PREFIX}{stage}"))?)
    }

    fn stage_trees(&self) -> Result<Vec<sled::Tree>, PersistenceError> {
        let mut trees = Vec::new();
        for name in self.db.tree_names() {
            if name.starts_with(STAGE_TREE_PREFIX.as_bytes()) {
                trees.push(self.db.open_tree(name)?);
            }
        }
        Ok(trees)
    }

    /// Flush pending writes; called on shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .context("Failed to flush pipeline store")?;
        Ok(())
    }
}

impl PipelineStore for SledStore {
    fn get_incident(&self, incident_id: &str) -> Result<Option<IncidentRecord>, PersistenceError> {
        self.incidents
            .get(incident_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(PersistenceError::from))
            .transpose()
    }

    fn update_incident(
        &self,
        incident_id: &str,
        update: &mut IncidentUpdate<'_>,
    ) -> Result<Option<IncidentRecord>, PersistenceError> {
        let mut failure: Option<PersistenceError> = None;

        let stored = self
            .incidents
            .update_and_fetch(incident_id.as_bytes(), |current| {
                failure = None;
                let unchanged = current.map(<[u8]>::to_vec);

                let existing = match current
                    .map(serde_json::from_slice::<IncidentRecord>)
                    .transpose()
                {
                    Ok(existing) => existing,
                    Err(e) => {
                        failure = Some(e.into());
                        return unchanged;
                    }
                };

                match update(existing.as_ref()) {
                    Some(next) => match serde_json::to_vec(&next) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            failure = Some(e.into());
                            unchanged
                        }
                    },
                    None => unchanged,
                }
            })?;

        if let Some(e) = failure {
            return Err(e);
        }

        let record = stored
            .map(|bytes| serde_json::from_slice::<IncidentRecord>(&bytes))
            .transpose()?;

        if let Some(rec) = &record {
            tracing::debug!(
                incident_id = %rec.incident_id,
                status = %rec.status,
                "Incident record written"
            );
        }
        Ok(record)
    }

    fn get_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError> {
        self.stage_tree(stage)?
            .get(incident_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(PersistenceError::from))
            .transpose()
    }

    fn upsert_stage_output(
        &self,
        record: StageOutputRecord,
    ) -> Result<StageOutputRecord, PersistenceError> {
        let tree = self.stage_tree(&record.stage)?;
        let mut failure: Option<PersistenceError> = None;

        let stored = tree.update_and_fetch(record.incident_id.as_bytes(), |current| {
            failure = None;
            let previous_runs = current
                .and_then(|bytes| serde_json::from_slice::<StageOutputRecord>(bytes).ok())
                .map_or(record.run_count, |prev| prev.run_count);

            let next = StageOutputRecord {
                run_count: previous_runs.saturating_add(1),
                ..record.clone()
            };
            match serde_json::to_vec(&next) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    failure = Some(e.into());
                    current.map(<[u8]>::to_vec)
                }
            }
        })?;

        if let Some(e) = failure {
            return Err(e);
        }

        let stored: StageOutputRecord = stored
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?
            .ok_or(PersistenceError::NotFound)?;

        tracing::debug!(
            incident_id = %stored.incident_id,
            stage = %stored.stage,
            run_count = stored.run_count,
            "Stage output stored"
        );
        Ok(stored)
    }

    fn delete_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError> {
        self.stage_tree(stage)?
            .remove(incident_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(PersistenceError::from))
            .transpose()
    }

    fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PersistenceError> {
        let mut expired = Vec::new();
        for item in self.incidents.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<IncidentRecord>(&value) {
                Ok(rec) if rec.created_at < cutoff => expired.push(rec.incident_id),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping undecodable incident during purge"
                    );
                }
            }
        }

        if expired.is_empty() {
            return Ok(expired);
        }

        let stage_trees = self.stage_trees()?;
        for id in &expired {
            self.incidents.remove(id.as_bytes())?;
            for tree in &stage_trees {
                tree.remove(id.as_bytes())?;
            }
        }
        Ok(expired)
    }

    fn ping(&self) -> Result<(), PersistenceError> {
        self.db.size_on_disk()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
