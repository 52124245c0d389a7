//! Incident Record and pipeline run bookkeeping

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::PipelineInputs;

/// Persisted lifecycle state of an incident.
///
/// `NEW` is never stored: creation and the transition to `Running` happen in
/// the same atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Running,
    Complete,
    Failed,
}

impl IncidentStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which declared pipeline an incident belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    SingleIncident,
    MultiIncident,
}

impl std::fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleIncident => write!(f, "single_incident"),
            Self::MultiIncident => write!(f, "multi_incident"),
        }
    }
}

/// How a stage was resolved during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResolution {
    Completed,
    Skipped,
    Failed,
}

/// Per-run bookkeeping stored on the Incident Record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agents_completed: Vec<String>,
    #[serde(default)]
    pub agents_skipped: Vec<String>,
    #[serde(default)]
    pub agents_failed: Vec<String>,
    #[serde(default)]
    pub total_duration_ms: Option<u64>,
}

impl PipelineRun {
    pub const fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            completed_at: None,
            agents_completed: Vec::new(),
            agents_skipped: Vec::new(),
            agents_failed: Vec::new(),
            total_duration_ms: None,
        }
    }

    /// Record the outcome of `stage` for the current run.
    ///
    /// A stage name appears in at most one list. When a resumed run
    /// re-evaluates a stage, its previous entry is dropped before the new one
    /// is appended, so each list stays in execution order.
    pub fn record(&mut self, stage: &str, resolution: StageResolution) {
        self.agents_completed.retain(|s| s != stage);
        self.agents_skipped.retain(|s| s != stage);
        self.agents_failed.retain(|s| s != stage);

        let target = match resolution {
            StageResolution::Completed => &mut self.agents_completed,
            StageResolution::Skipped => &mut self.agents_skipped,
            StageResolution::Failed => &mut self.agents_failed,
        };
        target.push(stage.to_string());
    }

    /// Record `stage` as the failure that halted the run.
    ///
    /// `reached` lists the stages evaluated before it. Entries a resumed run
    /// inherited for stages it never reached are dropped, so the lists
    /// describe this run only.
    pub fn halt(&mut self, stage: &str, reached: &[&str]) {
        let was_reached = |s: &String| reached.contains(&s.as_str());
        self.agents_completed.retain(was_reached);
        self.agents_skipped.retain(was_reached);
        self.agents_failed.clear();
        self.agents_failed.push(stage.to_string());
    }

    /// True once any stage has produced usable output in this run.
    pub fn has_progress(&self) -> bool {
        !self.agents_completed.is_empty() || !self.agents_skipped.is_empty()
    }

    pub fn is_resolved(&self, stage: &str) -> bool {
        self.agents_completed.iter().any(|s| s == stage)
            || self.agents_skipped.iter().any(|s| s == stage)
            || self.agents_failed.iter().any(|s| s == stage)
    }
}

/// One persisted record per incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: String,
    pub variant: PipelineVariant,
    pub status: IncidentStatus,
    pub inputs: PipelineInputs,
    pub pipeline_run: PipelineRun,
    /// Name of the stage whose cached output is the final result.
    #[serde(default)]
    pub result_pointer: Option<String>,
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Identifies the background task currently (or last) driving this record.
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// Refreshed by the background task after every stage.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncidentRecord {
    /// A fresh record, already in the running state.
    pub fn new_running(
        incident_id: impl Into<String>,
        variant: PipelineVariant,
        inputs: PipelineInputs,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            variant,
            status: IncidentStatus::Running,
            inputs,
            pipeline_run: PipelineRun::started(now),
            result_pointer: None,
            report_url: None,
            error: None,
            run_id: Some(run_id),
            last_heartbeat: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move an existing record back to running for a new run.
    ///
    /// Completed incidents start over with empty lists; anything else keeps
    /// the lists it already has. `inputs` and `created_at` never change.
    pub fn restart(&mut self, run_id: Uuid, now: DateTime<Utc>) {
        let started = if self.status == IncidentStatus::Complete {
            PipelineRun::started(now)
        } else {
            PipelineRun {
                started_at: now,
                completed_at: None,
                total_duration_ms: None,
                ..std::mem::replace(&mut self.pipeline_run, PipelineRun::started(now))
            }
        };

        self.pipeline_run = started;
        self.status = IncidentStatus::Running;
        self.result_pointer = None;
        self.report_url = None;
        self.error = None;
        self.run_id = Some(run_id);
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    /// A running record whose task has not reported in `stale_after`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.status != IncidentStatus::Running {
            return false;
        }
        let last_seen = self.last_heartbeat.unwrap_or(self.updated_at);
        now - last_seen > stale_after
    }

    /// True when `run_id` is the run that currently owns this record.
    pub fn is_owned_by(&self, run_id: Uuid) -> bool {
        self.run_id == Some(run_id)
    }

    /// Coarse progress indicator: 0, 50 or 100.
    pub fn progress(&self) -> u8 {
        match self.status {
            IncidentStatus::Complete => 100,
            _ if self.pipeline_run.has_progress() => 50,
            _ => 0,
        }
    }

    /// The stage an observer should consider "current".
    pub fn current_stage<'a>(&self, declared: &[&'a str]) -> Option<&'a str> {
        match self.status {
            IncidentStatus::Complete => None,
            IncidentStatus::Failed => self
                .pipeline_run
                .agents_failed
                .last()
                .and_then(|failed| declared.iter().copied().find(|s| *s == failed.as_str())),
            IncidentStatus::Running => declared
                .iter()
                .copied()
                .find(|stage| !self.pipeline_run.is_resolved(stage)),
        }
    }
}
