//! Periodic pruning of health-check history.
//!
//! Records older than the retention window are deleted once an hour.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::Database;

const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// Cleanup manager for old health-check records
pub struct HistoryRetention {
    database: Arc<dyn Database>,
    retention: TimeDelta,
}

impl HistoryRetention {
    pub fn new(database: Arc<dyn Database>, retention: TimeDelta) -> Self {
        Self { database, retention }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// Delete history recorded before the retention window
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = self.cutoff(now);
        debug!(%cutoff, "Cleaning up health-check history");

        let deleted = self.database.delete_health_checks_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "Retention cleanup completed");
        }
        Ok(deleted)
    }

    /// Start background cleanup task (runs every hour)
    pub fn start_periodic_cleanup(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_PERIOD);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.cleanup(Utc::now()).await {
                            warn!("Periodic history cleanup failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }
}
