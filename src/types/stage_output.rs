//! Stage cache entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage_data::StageData;
use crate::config::defaults::REUSE_THRESHOLD;

/// Last persisted result of one stage for one incident.
///
/// Unique per `(incident_id, stage)`; upserted every time the stage actually
/// executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutputRecord {
    pub incident_id: String,
    pub stage: String,
    pub data: StageData,
    pub confidence: f64,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    /// Number of real executions. Owned by the store, which increments it on
    /// every upsert.
    #[serde(default)]
    pub run_count: u32,
}

impl StageOutputRecord {
    /// Whether a later run may reuse this output instead of executing.
    pub fn is_reusable(&self) -> bool {
        self.confidence >= REUSE_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::stage_data::{ChartPoint, GraphOutput};

    fn record(confidence: f64) -> StageOutputRecord {
        StageOutputRecord {
            incident_id: "INC-1".to_string(),
            stage: "graph_agent".to_string(),
            data: StageData::Graph(GraphOutput {
                chart_type: "bar".to_string(),
                title: "t".to_string(),
                x_axis: String::new(),
                y_axis: String::new(),
                data: vec![ChartPoint {
                    label: "a".to_string(),
                    value: 1.0,
                }],
            }),
            confidence,
            executed_at: Utc::now(),
            duration_ms: 5,
            model_used: None,
            tokens_used: 0,
            run_count: 1,
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(record(0.6).is_reusable());
        assert!(record(0.95).is_reusable());
        assert!(!record(0.59).is_reusable());
        assert!(!record(0.0).is_reusable());
    }
}
