//! Durable status persistence for probe results.
//!
//! Both writes are idempotent and retried with a fixed backoff. A write that
//! still fails after the last attempt is logged and dropped; it never stops
//! the monitoring loop.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::Database;
use crate::monitoring::types::ProbeResult;

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_secs(1) }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Retry {}/{} for {}: {:#}", attempt, attempts, what, e);
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writes probe outcomes to the storage collaborator
pub struct StatusStore {
    database: Arc<dyn Database>,
    policy: RetryPolicy,
}

impl StatusStore {
    pub fn new(database: Arc<dyn Database>, policy: RetryPolicy) -> Self {
        Self { database, policy }
    }

    /// Persist the health-check record and the endpoint's last-known status.
    ///
    /// Returns `true` when both writes landed.
    pub async fn persist(&self, result: &ProbeResult) -> bool {
        let recorded = with_retry(self.policy, "recording health check", || {
            self.database.record_health_check(result)
        })
        .await;

        let status = result.outcome.into();
        let updated = with_retry(self.policy, "updating endpoint status", || {
            self.database.update_endpoint_status(result.endpoint_id, status, result.checked_at)
        })
        .await;

        match (&recorded, &updated) {
            (Ok(row_id), Ok(())) => {
                debug!(endpoint_id = result.endpoint_id, row_id, "Persisted probe result");
            }
            _ => {
                if let Err(e) = &recorded {
                    error!(endpoint_id = result.endpoint_id, "Failed to record health check: {:#}", e);
                }
                if let Err(e) = &updated {
                    error!(endpoint_id = result.endpoint_id, "Failed to update endpoint status: {:#}", e);
                }
            }
        }

        recorded.is_ok() && updated.is_ok()
    }
}
