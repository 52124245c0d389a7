//! Retention sweeper: deletes incidents older than the retention window

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::pipeline::{PipelineError, PipelineService};
use crate::storage::PersistenceError;

pub struct RetentionSweeper {
    service: Arc<PipelineService>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(service: Arc<PipelineService>, config: &StorageConfig) -> Self {
        Self {
            service,
            retention: config.retention(),
            interval: config.sweep_interval(),
        }
    }

    /// One sweep. Returns the number of incidents removed.
    ///
    /// The store scan is synchronous, so it runs on the blocking pool.
    pub async fn sweep(&self) -> Result<usize, PipelineError> {
        let service = Arc::clone(&self.service);
        let retention = self.retention;
        let purged = tokio::task::spawn_blocking(move || service.purge_expired(retention))
            .await
            .map_err(|e| PersistenceError::Storage(format!("retention sweep task failed: {e}")))??;
        for id in &purged {
            debug!(incident_id = %id, "Incident expired");
        }
        Ok(purged.len())
    }

    /// Sweep on every tick until `cancel` fires. The first sweep runs
    /// immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            retention_days = self.retention.num_days(),
            interval_secs = self.interval.as_secs(),
            "Retention sweeper started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Retention sweeper stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Retention sweep failed, will retry next cycle");
                    }
                }
            }
        }
    }
}
