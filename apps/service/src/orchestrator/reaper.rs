//! Periodic removal of endpoints whose expiry has passed.
//!
//! Each expired endpoint leaves its schedule before it leaves the registry, so
//! a tick never dispatches a probe for an id the registry has forgotten. It is
//! detached once more after the delete in case a concurrent create or update
//! placed it while storage was busy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventBus, MonitorEvent};
use crate::monitoring::{FailureTracker, ScheduleManager};
use crate::registry::EndpointRegistry;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<i64>,
    /// Expired endpoints whose deletion failed; retried on the next sweep
    pub failed: Vec<i64>,
}

pub struct ExpiryReaper {
    registry: Arc<EndpointRegistry>,
    schedules: Arc<ScheduleManager>,
    tracker: Arc<FailureTracker>,
    events: EventBus,
}

impl ExpiryReaper {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        schedules: Arc<ScheduleManager>,
        tracker: Arc<FailureTracker>,
        events: EventBus,
    ) -> Self {
        Self { registry, schedules, tracker, events }
    }

    /// Remove every endpoint that expired at or before `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = self.registry.snapshot(|e| e.is_expired(now)).await;
        let mut report = SweepReport::default();

        for endpoint in expired {
            self.schedules.remove_endpoint(endpoint.id).await;

            match self.registry.remove(endpoint.id).await {
                Ok(_) => {
                    // placed again while the delete was in flight
                    if self.schedules.remove_endpoint(endpoint.id).await {
                        debug!(endpoint_id = endpoint.id, "Dropped endpoint rescheduled mid-sweep");
                    }
                    self.tracker.forget(endpoint.id);
                    info!(endpoint_id = endpoint.id, url = %endpoint.url, "Removed expired endpoint");
                    self.events.publish(MonitorEvent::EndpointExpired {
                        endpoint_id: endpoint.id,
                        url: endpoint.url,
                        at: now,
                    });
                    report.removed.push(endpoint.id);
                }
                Err(e) => {
                    warn!(endpoint_id = endpoint.id, "Failed to remove expired endpoint: {}", e);
                    report.failed.push(endpoint.id);
                }
            }
        }

        if !report.removed.is_empty() || !report.failed.is_empty() {
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Expiry sweep completed"
            );
        } else {
            debug!("Expiry sweep found nothing to remove");
        }
        report
    }

    /// Sweep immediately, then once per `period` until cancelled
    pub fn start_periodic_sweep(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                }
            }
            debug!("Expiry reaper stopped");
        })
    }
}
