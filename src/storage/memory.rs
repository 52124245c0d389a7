//! In-memory pipeline store for tests and throwaway runs
//!
//! Thread-safe via `RwLock`. Not durable; data is lost on restart.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{IncidentUpdate, PersistenceError, PipelineStore};
use crate::types::{IncidentRecord, StageOutputRecord};

type StageKey = (String, String);

#[derive(Default)]
pub struct InMemoryStore {
    incidents: RwLock<HashMap<String, IncidentRecord>>,
    outputs: RwLock<HashMap<StageKey, StageOutputRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> PersistenceError {
    PersistenceError::Storage(e.to_string())
}

impl PipelineStore for InMemoryStore {
    fn get_incident(&self, incident_id: &str) -> Result<Option<IncidentRecord>, PersistenceError> {
        let store = self.incidents.read().map_err(poisoned)?;
        Ok(store.get(incident_id).cloned())
    }

    fn update_incident(
        &self,
        incident_id: &str,
        update: &mut IncidentUpdate<'_>,
    ) -> Result<Option<IncidentRecord>, PersistenceError> {
        let mut store = self.incidents.write().map_err(poisoned)?;
        if let Some(next) = update(store.get(incident_id)) {
            store.insert(incident_id.to_string(), next);
        }
        Ok(store.get(incident_id).cloned())
    }

    fn get_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError> {
        let store = self.outputs.read().map_err(poisoned)?;
        Ok(store
            .get(&(incident_id.to_string(), stage.to_string()))
            .cloned())
    }

    fn upsert_stage_output(
        &self,
        record: StageOutputRecord,
    ) -> Result<StageOutputRecord, PersistenceError> {
        let mut store = self.outputs.write().map_err(poisoned)?;
        let key = (record.incident_id.clone(), record.stage.clone());
        let previous_runs = store.get(&key).map_or(record.run_count, |prev| prev.run_count);

        let stored = StageOutputRecord {
            run_count: previous_runs.saturating_add(1),
            ..record
        };
        store.insert(key, stored.clone());
        Ok(stored)
    }

    fn delete_stage_output(
        &self,
        incident_id: &str,
        stage: &str,
    ) -> Result<Option<StageOutputRecord>, PersistenceError> {
        let mut store = self.outputs.write().map_err(poisoned)?;
        Ok(store.remove(&(incident_id.to_string(), stage.to_string())))
    }

    fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PersistenceError> {
        let mut incidents = self.incidents.write().map_err(poisoned)?;
        let expired: Vec<String> = incidents
            .values()
            .filter(|rec| rec.created_at < cutoff)
            .map(|rec| rec.incident_id.clone())
            .collect();

        for id in &expired {
            incidents.remove(id);
        }
        drop(incidents);

        let mut outputs = self.outputs.write().map_err(poisoned)?;
        outputs.retain(|(id, _), _| !expired.contains(id));
        Ok(expired)
    }

    fn ping(&self) -> Result<(), PersistenceError> {
        self.incidents.read().map(|_| ()).map_err(poisoned)
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::seed_incident;
    use crate::types::stage_data::{ChartPoint, GraphOutput, StageData};
    use crate::types::{IncidentInputs, IncidentStatus, PipelineInputs, PipelineVariant};
    use uuid::Uuid;

    fn incident(id: &str) -> IncidentRecord {
        IncidentRecord::new_running(
            id,
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

    #[test]
    fn test_update_creates_when_absent() {
        let store = InMemoryStore::new();
        let created = store
            .update_incident("INC-1", &mut |current| {
                assert!(current.is_none());
                Some(incident("INC-1"))
            })
            .unwrap();
        assert_eq!(created.unwrap().status, IncidentStatus::Running);
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn PipelineStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        seed_incident(store.as_ref(), incident("INC-7"));
        assert!(store.get_incident("INC-7").unwrap().is_some());
        assert!(store.ping().is_ok());
    }

    fn graph_output(run_count: u32) -> StageOutputRecord {
        StageOutputRecord {
            incident_id: "INC-1".to_string(),
            stage: "graph_agent".to_string(),
            data: StageData::Graph(GraphOutput {
                chart_type: "bar".to_string(),
                title: "cost".to_string(),
                x_axis: String::new(),
                y_axis: String::new(),
                data: vec![ChartPoint {
                    label: "a".to_string(),
                    value: 1.0,
                }],
            }),
            confidence: 0.9,
            executed_at: Utc::now(),
            duration_ms: 5,
            model_used: None,
            tokens_used: 0,
            run_count,
        }
    }

    #[test]
    fn test_deleted_output_count_carries_over() {
        let store = InMemoryStore::new();
        store.upsert_stage_output(graph_output(0)).unwrap();
        store.upsert_stage_output(graph_output(0)).unwrap();

        let removed = store.delete_stage_output("INC-1", "graph_agent").unwrap().unwrap();
        assert_eq!(removed.run_count, 2);
        assert!(store.get_stage_output("INC-1", "graph_agent").unwrap().is_none());

        let rerun = store.upsert_stage_output(graph_output(removed.run_count)).unwrap();
        assert_eq!(rerun.run_count, 3);
    }
}
