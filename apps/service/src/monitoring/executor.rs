use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::checker::Checker;
use super::types::ProbeResult;
use crate::database::models::Endpoint;

/// Probe dispatcher - starts probes and forwards their results downstream
///
/// Dispatch never waits: each probe runs in its own task, which is where the
/// concurrency permit is awaited. Probes that outlive their tick are not
/// cancelled.
#[derive(Clone)]
pub struct ProbeDispatcher {
    checker: Arc<dyn Checker>,
    permits: Arc<Semaphore>,
    result_tx: mpsc::Sender<ProbeResult>,
}

impl ProbeDispatcher {
    pub fn new(
        checker: Arc<dyn Checker>,
        max_concurrent_probes: usize,
        result_tx: mpsc::Sender<ProbeResult>,
    ) -> Self {
        Self {
            checker,
            permits: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
            result_tx,
        }
    }

    /// Start one probe per endpoint, returning how many were started
    pub fn dispatch(&self, endpoints: Vec<Endpoint>) -> usize {
        let count = endpoints.len();
        for endpoint in endpoints {
            self.dispatch_one(endpoint);
        }
        count
    }

    pub fn dispatch_one(&self, endpoint: Endpoint) -> JoinHandle<()> {
        let checker = self.checker.clone();
        let permits = self.permits.clone();
        let result_tx = self.result_tx.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so a permit always arrives
            let _permit = permits.acquire_owned().await.ok();

            let result = checker.probe(&endpoint).await;
            debug!(
                endpoint_id = endpoint.id,
                outcome = %result.outcome,
                status_code = ?result.status_code,
                "Probe finished"
            );

            if result_tx.send(result).await.is_err() {
                warn!(endpoint_id = endpoint.id, "Result channel closed, dropping probe result");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewEndpoint;
    use crate::monitoring::types::ProbeOutcome;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowChecker {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Checker for SlowChecker {
        async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeResult::new(endpoint.id, endpoint.url.clone()).completed(200, String::new(), 1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_capped() {
        let checker = Arc::new(SlowChecker { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = ProbeDispatcher::new(checker.clone(), 2, tx);

        let endpoints = (1..=5)
            .map(|id| NewEndpoint::new("http://ok", 5).into_endpoint(id, Utc::now()))
            .collect();
        assert_eq!(dispatcher.dispatch(endpoints), 5);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.outcome, ProbeOutcome::Ok);
            seen.push(result.endpoint_id);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(checker.peak.load(Ordering::SeqCst), 2);
    }
}
