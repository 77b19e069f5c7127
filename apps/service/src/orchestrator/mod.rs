/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Loads the registry and builds schedules at startup
/// - Consumes probe results, feeding the failure tracker and status store
/// - Runs the expiry reaper and history retention in the background
/// - Exposes endpoint and schedule operations to the outer surfaces
pub mod reaper;
pub mod retention;

#[cfg(test)]
mod tests;

pub use reaper::{ExpiryReaper, SweepReport};
pub use retention::HistoryRetention;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::database::Database;
use crate::database::models::{Endpoint, EndpointUpdate, HealthCheck, NewEndpoint, Schedule};
use crate::database::status::StatusStore;
use crate::error::{MonitorError, MonitorResult};
use crate::events::{EventBus, MonitorEvent};
use crate::monitoring::{
    Checker, FailureTracker, HttpChecker, ProbeDispatcher, ProbeResult, ScheduleManager,
    StreakChange,
};
use crate::registry::EndpointRegistry;
use crate::validation::{validate_endpoint_url, validate_interval, validate_schedule_name};

const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Request to group endpoints under one interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "interval")]
    pub interval_seconds: u64,
    pub endpoint_ids: Vec<i64>,
}

/// Partial update of a schedule; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "interval")]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub endpoint_ids: Option<Vec<i64>>,
}

/// Everything that handles a finished probe
struct ResultSink {
    registry: Arc<EndpointRegistry>,
    tracker: Arc<FailureTracker>,
    status_tx: mpsc::Sender<ProbeResult>,
    events: EventBus,
}

impl ResultSink {
    async fn handle(&self, result: ProbeResult) {
        if !self.registry.apply_probe_result(&result).await {
            debug!(endpoint_id = result.endpoint_id, "Discarding result for removed endpoint");
            return;
        }

        match self.tracker.observe(result.endpoint_id, result.outcome) {
            StreakChange::Alert { streak } => {
                warn!(
                    target: "pingwatch::alert",
                    endpoint_id = result.endpoint_id,
                    url = %result.url,
                    failures = streak,
                    outcome = %result.outcome,
                    "Endpoint is failing"
                );
                self.events.publish(MonitorEvent::Alert {
                    endpoint_id: result.endpoint_id,
                    url: result.url.clone(),
                    failures: streak,
                    at: result.checked_at,
                });
            }
            StreakChange::Recovered { streak } => {
                info!(
                    target: "pingwatch::alert",
                    endpoint_id = result.endpoint_id,
                    url = %result.url,
                    failures = streak,
                    "Endpoint recovered"
                );
                self.events.publish(MonitorEvent::Recovered {
                    endpoint_id: result.endpoint_id,
                    url: result.url.clone(),
                    failures: streak,
                    at: result.checked_at,
                });
            }
            StreakChange::None => {}
        }

        debug!(
            endpoint_id = result.endpoint_id,
            url = %result.url,
            outcome = %result.outcome,
            latency_ms = ?result.latency_ms,
            "Probe result"
        );

        if self.status_tx.send(result).await.is_err() {
            warn!("Status writer stopped, probe result not persisted");
        }
    }
}

/// Persist results one at a time in arrival order; a retried write finishes
/// before any newer result is written
async fn run_status_writer(store: StatusStore, mut status_rx: mpsc::Receiver<ProbeResult>) {
    while let Some(result) = status_rx.recv().await {
        store.persist(&result).await;
    }
    debug!("Status writer stopped");
}

async fn run_result_loop(
    sink: ResultSink,
    mut result_rx: mpsc::Receiver<ProbeResult>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(result) = result_rx.recv() => sink.handle(result).await,
            else => break,
        }
    }
    debug!("Result loop stopped");
}

/// Main orchestrator for the monitoring engine
pub struct Orchestrator {
    config: MonitoringConfig,
    database: Arc<dyn Database>,
    registry: Arc<EndpointRegistry>,
    schedules: Arc<ScheduleManager>,
    dispatcher: ProbeDispatcher,
    tracker: Arc<FailureTracker>,
    reaper: Arc<ExpiryReaper>,
    events: EventBus,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Load state from `database` and start monitoring with the HTTP prober
    pub async fn start(config: MonitoringConfig, database: Arc<dyn Database>) -> Result<Self> {
        let checker = Arc::new(HttpChecker::new(config.probe_settings())?);
        Self::start_with_checker(config, database, checker).await
    }

    pub async fn start_with_checker(
        config: MonitoringConfig,
        database: Arc<dyn Database>,
        checker: Arc<dyn Checker>,
    ) -> Result<Self> {
        info!("Starting monitoring orchestrator...");

        let registry = Arc::new(EndpointRegistry::new(database.clone()));
        let loaded = registry.load().await?;

        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(RESULT_CHANNEL_CAPACITY);
        let dispatcher = ProbeDispatcher::new(checker, config.max_concurrent_probes, result_tx);
        let status_retry = config.status_retry();
        let schedules = Arc::new(ScheduleManager::new(
            registry.clone(),
            dispatcher.clone(),
            database.clone(),
            status_retry,
        ));

        let persisted = match database.load_schedules().await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Failed to load persisted schedules, rebuilding from endpoints: {:#}", e);
                Vec::new()
            }
        };
        let schedule_count = schedules.rebuild(persisted).await;

        let tracker = Arc::new(FailureTracker::new(config.failure_threshold));
        let events = EventBus::default();
        let cancel = CancellationToken::new();

        let (status_tx, status_rx) = mpsc::channel::<ProbeResult>(RESULT_CHANNEL_CAPACITY);
        let status_handle = tokio::spawn(run_status_writer(
            StatusStore::new(database.clone(), status_retry),
            status_rx,
        ));

        let sink = ResultSink {
            registry: registry.clone(),
            tracker: tracker.clone(),
            status_tx,
            events: events.clone(),
        };
        let result_handle = tokio::spawn(run_result_loop(sink, result_rx, cancel.child_token()));

        let reaper = Arc::new(ExpiryReaper::new(
            registry.clone(),
            schedules.clone(),
            tracker.clone(),
            events.clone(),
        ));
        let reaper_handle =
            reaper.clone().start_periodic_sweep(config.reaper_period(), cancel.child_token());

        let retention = HistoryRetention::new(database.clone(), config.history_retention());
        let retention_handle = retention.start_periodic_cleanup(cancel.child_token());

        info!(
            endpoints = loaded,
            schedules = schedule_count,
            failure_threshold = config.failure_threshold,
            "Orchestrator started"
        );

        Ok(Self {
            config,
            database,
            registry,
            schedules,
            dispatcher,
            tracker,
            reaper,
            events,
            cancel,
            task_handles: Mutex::new(vec![
                result_handle,
                status_handle,
                reaper_handle,
                retention_handle,
            ]),
        })
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn schedules(&self) -> &Arc<ScheduleManager> {
        &self.schedules
    }

    pub fn tracker(&self) -> &Arc<FailureTracker> {
        &self.tracker
    }

    pub fn reaper(&self) -> &Arc<ExpiryReaper> {
        &self.reaper
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register an endpoint and start monitoring it
    pub async fn create_endpoint(&self, mut request: NewEndpoint) -> MonitorResult<Endpoint> {
        validate_endpoint_url(&request.url).into_result()?;
        validate_interval(request.interval_seconds).into_result()?;

        if request.expires_at.is_none() {
            request.expires_at = self.config.default_expiry().map(|ttl| Utc::now() + ttl);
        }

        let endpoint = self.registry.add(request).await?;
        if let Err(e) = self.schedules.add_endpoint(&endpoint).await {
            warn!(endpoint_id = endpoint.id, "Scheduling failed, rolling back registration: {}", e);
            match self.registry.remove(endpoint.id).await {
                Ok(_) | Err(MonitorError::EndpointNotFound(_)) => {}
                Err(rollback) => {
                    error!(endpoint_id = endpoint.id, "Rollback failed: {}", rollback);
                }
            }
            return Err(e);
        }

        if self.config.probe_on_create {
            self.dispatcher.dispatch_one(endpoint.clone());
        }

        info!(
            endpoint_id = endpoint.id,
            url = %endpoint.url,
            interval_secs = endpoint.interval_seconds,
            "Endpoint created"
        );
        Ok(endpoint)
    }

    /// An endpoint visible to `owner`; `None` sees every endpoint
    pub async fn get_endpoint(&self, owner: Option<&str>, id: i64) -> MonitorResult<Endpoint> {
        self.registry
            .get(id)
            .await
            .filter(|e| e.is_owned_by(owner))
            .ok_or(MonitorError::EndpointNotFound(id))
    }

    pub async fn list_endpoints(&self, owner: Option<&str>) -> Vec<Endpoint> {
        self.registry.snapshot(|e| e.is_owned_by(owner)).await
    }

    pub async fn update_endpoint(
        &self,
        owner: Option<&str>,
        id: i64,
        update: EndpointUpdate,
    ) -> MonitorResult<Endpoint> {
        self.get_endpoint(owner, id).await?;
        if let Some(url) = &update.url {
            validate_endpoint_url(url).into_result()?;
        }
        if let Some(interval) = update.interval_seconds {
            validate_interval(interval).into_result()?;
        }

        let (before, after) = self.registry.update(id, &update).await?;
        let unscheduled = self.schedules.schedule_of(id).await.is_none();
        if after.is_expired(Utc::now()) {
            self.unschedule_expired(id).await;
        } else if before.interval_seconds != after.interval_seconds || unscheduled {
            self.reschedule(id, after.interval_seconds).await?;
        }

        info!(endpoint_id = id, "Endpoint updated");
        Ok(after)
    }

    /// Stop monitoring an endpoint and delete it
    pub async fn delete_endpoint(&self, owner: Option<&str>, id: i64) -> MonitorResult<()> {
        let endpoint = self.get_endpoint(owner, id).await?;

        self.schedules.remove_endpoint(id).await;
        if let Err(e) = self.registry.remove(id).await {
            if let Err(restore) = self.schedules.add_endpoint(&endpoint).await {
                warn!(endpoint_id = id, "Failed to reschedule after failed delete: {}", restore);
            }
            return Err(e);
        }

        // a concurrent update may have placed it again before the removal
        self.schedules.remove_endpoint(id).await;
        self.tracker.forget(id);
        info!(endpoint_id = id, "Endpoint deleted");
        Ok(())
    }

    /// Most recent health checks first
    pub async fn recent_checks(
        &self,
        owner: Option<&str>,
        id: i64,
        limit: usize,
    ) -> MonitorResult<Vec<HealthCheck>> {
        self.get_endpoint(owner, id).await?;
        Ok(self.database.recent_health_checks(id, limit).await?)
    }

    /// Move the listed endpoints onto `interval`, labelling the schedule
    pub async fn create_schedule(
        &self,
        owner: Option<&str>,
        request: NewSchedule,
    ) -> MonitorResult<Schedule> {
        validate_interval(request.interval_seconds).into_result()?;
        if let Some(name) = &request.name {
            validate_schedule_name(name).into_result()?;
        }
        if request.endpoint_ids.is_empty() {
            return Err(MonitorError::validation("A schedule needs at least one endpoint"));
        }
        self.check_members(owner, &request.endpoint_ids).await?;

        for id in &request.endpoint_ids {
            self.move_endpoint(*id, request.interval_seconds).await?;
        }

        let schedule = self
            .schedules
            .get_by_interval(request.interval_seconds)
            .await
            .ok_or_else(|| MonitorError::validation("Every listed endpoint was removed"))?;
        let schedule = match &request.name {
            Some(name) => self.schedules.rename(schedule.id, name).await?,
            None => schedule,
        };

        info!(schedule_id = %schedule.id, interval_secs = schedule.interval_seconds, "Schedule created");
        Ok(schedule)
    }

    pub async fn list_schedules(&self) -> Vec<Schedule> {
        self.schedules.list().await
    }

    pub async fn get_schedule(&self, id: Uuid) -> MonitorResult<Schedule> {
        self.schedules.get(id).await.ok_or(MonitorError::ScheduleNotFound(id))
    }

    pub async fn get_schedule_by_interval(&self, interval_seconds: u64) -> Option<Schedule> {
        self.schedules.get_by_interval(interval_seconds).await
    }

    /// Relabel, retime, or add members to a schedule.
    ///
    /// Changing the interval moves every member, so the result may carry a
    /// different id than `id`.
    pub async fn update_schedule(
        &self,
        owner: Option<&str>,
        id: Uuid,
        update: ScheduleUpdate,
    ) -> MonitorResult<Schedule> {
        let current = self.get_schedule(id).await?;
        let target = update.interval_seconds.unwrap_or(current.interval_seconds);
        validate_interval(target).into_result()?;
        if let Some(name) = &update.name {
            validate_schedule_name(name).into_result()?;
        }
        if let Some(ids) = &update.endpoint_ids {
            self.check_members(owner, ids).await?;
        }

        let target_existed = self.schedules.get_by_interval(target).await.is_some();
        if target != current.interval_seconds {
            for member in &current.endpoint_ids {
                self.move_endpoint(*member, target).await?;
            }
        }
        for member in update.endpoint_ids.iter().flatten() {
            self.move_endpoint(*member, target).await?;
        }

        let schedule = self
            .schedules
            .get_by_interval(target)
            .await
            .ok_or(MonitorError::ScheduleNotFound(id))?;
        let label = match (&update.name, target_existed) {
            (Some(name), _) => Some(name.as_str()),
            (None, false) => Some(current.name.as_str()),
            (None, true) => None,
        };
        let schedule = match label {
            Some(name) if name != schedule.name => self.schedules.rename(schedule.id, name).await?,
            _ => schedule,
        };

        info!(schedule_id = %schedule.id, interval_secs = schedule.interval_seconds, "Schedule updated");
        Ok(schedule)
    }

    /// Delete every member visible to `owner`; the schedule is destroyed once
    /// it has no members left
    pub async fn delete_schedule(&self, owner: Option<&str>, id: Uuid) -> MonitorResult<()> {
        let schedule = self.get_schedule(id).await?;

        for member in &schedule.endpoint_ids {
            match self.delete_endpoint(owner, *member).await {
                Ok(()) => {}
                Err(MonitorError::EndpointNotFound(_)) => {
                    debug!(endpoint_id = member, "Skipping endpoint not visible to caller");
                }
                Err(e) => return Err(e),
            }
        }

        info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }

    /// Stop every timer and background task; in-flight probes finish on their own
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator...");
        self.cancel.cancel();
        self.schedules.shutdown().await;
        self.schedules.sync_storage().await;

        let handles: Vec<JoinHandle<()>> = match self.task_handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Orchestrator stopped");
    }

    async fn check_members(&self, owner: Option<&str>, ids: &[i64]) -> MonitorResult<()> {
        for id in ids {
            if self.get_endpoint(owner, *id).await.is_err() {
                return Err(MonitorError::validation(format!("Endpoint {id} does not exist")));
            }
        }
        Ok(())
    }

    /// Give an endpoint a new interval, storage first, then its schedule
    async fn move_endpoint(&self, id: i64, interval: u64) -> MonitorResult<()> {
        let (before, after) = match self.registry.get(id).await {
            Some(current) if current.interval_seconds == interval => (current.clone(), current),
            Some(_) => self.registry.update(id, &EndpointUpdate::interval(interval)).await?,
            None => return Err(MonitorError::EndpointNotFound(id)),
        };
        debug!(endpoint_id = id, from = before.interval_seconds, to = interval, "Moving endpoint");

        if after.is_expired(Utc::now()) {
            self.unschedule_expired(id).await;
        } else {
            self.reschedule(id, interval).await?;
        }
        Ok(())
    }

    async fn reschedule(&self, id: i64, interval: u64) -> MonitorResult<()> {
        match self.schedules.change_interval(id, interval).await {
            Ok(_) => Ok(()),
            Err(MonitorError::EndpointNotFound(_)) => {
                debug!(endpoint_id = id, "Endpoint removed before it could be rescheduled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Expired endpoints wait for the reaper outside any schedule
    async fn unschedule_expired(&self, id: i64) {
        if self.schedules.remove_endpoint(id).await {
            debug!(endpoint_id = id, "Expired endpoint unscheduled");
        }
    }
}
