//! Interval-grouped probe scheduling.
//!
//! Exactly one schedule exists per distinct check interval in use. Every
//! registered, non-expired endpoint is a member of the schedule for its
//! interval, and every schedule has at least one member. Each schedule owns a
//! periodic timer task; a schedule that loses its last member is stopped and
//! destroyed, and a later schedule for the same interval gets a fresh id.
//!
//! Placing an endpoint takes the registry's read lock before the schedule
//! map, never the other way round. The map is never held across storage I/O;
//! persistence is handed to a single background writer in the order the
//! mutations happened.

use chrono::Utc;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::ProbeDispatcher;
use crate::database::Database;
use crate::database::models::{Endpoint, Schedule};
use crate::database::status::{RetryPolicy, with_retry};
use crate::error::{MonitorError, MonitorResult};
use crate::registry::EndpointRegistry;
use crate::validation::validate_interval;

/// Lifecycle of a schedule's timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    Created,
    Running,
    Stopped,
}

struct ScheduleEntry {
    schedule: Schedule,
    state: ScheduleState,
    cancel: CancellationToken,
}

impl ScheduleEntry {
    fn new(schedule: Schedule) -> Self {
        Self { schedule, state: ScheduleState::Created, cancel: CancellationToken::new() }
    }

    fn start(&mut self, shared: Weak<Shared>, live_timers: Arc<AtomicUsize>) {
        if self.state != ScheduleState::Created {
            return;
        }

        let interval = self.schedule.interval_seconds;
        let schedule_id = self.schedule.id;
        let cancel = self.cancel.clone();

        let live = LiveTimer::register(live_timers);
        tokio::spawn(async move {
            let _live = live;
            run_timer(shared, interval, schedule_id, cancel).await;
        });

        self.state = ScheduleState::Running;
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.state = ScheduleState::Stopped;
    }
}

/// Counts a timer task as live until the task is dropped, however it ends
struct LiveTimer(Arc<AtomicUsize>);

impl LiveTimer {
    fn register(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveTimer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScheduleMap {
    by_interval: HashMap<u64, ScheduleEntry>,
    /// endpoint id -> interval of the schedule it belongs to
    membership: HashMap<i64, u64>,
}

impl ScheduleMap {
    fn find(&self, schedule_id: Uuid) -> Option<&ScheduleEntry> {
        self.by_interval.values().find(|e| e.schedule.id == schedule_id)
    }

    fn find_mut(&mut self, schedule_id: Uuid) -> Option<&mut ScheduleEntry> {
        self.by_interval.values_mut().find(|e| e.schedule.id == schedule_id)
    }
}

enum StorageOp {
    Create(Schedule),
    Update(Schedule),
    Delete(Uuid),
    Flush(oneshot::Sender<()>),
}

struct Shared {
    map: RwLock<ScheduleMap>,
    registry: Arc<EndpointRegistry>,
    dispatcher: ProbeDispatcher,
    storage_tx: mpsc::UnboundedSender<StorageOp>,
    live_timers: Arc<AtomicUsize>,
}

impl Shared {
    fn persist(&self, op: StorageOp) {
        if self.storage_tx.send(op).is_err() {
            warn!("Schedule writer stopped, change kept in memory only");
        }
    }

    /// One timer firing: copy the member set, release the lock, then probe
    async fn tick(&self, interval_seconds: u64, schedule_id: Uuid) -> Option<usize> {
        let members = {
            let map = self.map.read().await;
            match map.by_interval.get(&interval_seconds) {
                Some(entry)
                    if entry.schedule.id == schedule_id
                        && entry.state == ScheduleState::Running =>
                {
                    entry.schedule.endpoint_ids.clone()
                }
                _ => return None,
            }
        };

        let now = Utc::now();
        let endpoints = self
            .registry
            .snapshot(|e| members.contains(&e.id) && !e.is_expired(now))
            .await;

        debug!(
            %schedule_id,
            interval_seconds,
            members = members.len(),
            probing = endpoints.len(),
            "Schedule tick"
        );
        Some(self.dispatcher.dispatch(endpoints))
    }
}

async fn run_timer(
    shared: Weak<Shared>,
    interval_seconds: u64,
    schedule_id: Uuid,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs(interval_seconds);
    let Some(first_tick) = Instant::now().checked_add(period) else {
        error!(%schedule_id, interval_seconds, "Interval out of range, schedule timer not started");
        return;
    };
    let mut timer = tokio::time::interval_at(first_tick, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                if shared.tick(interval_seconds, schedule_id).await.is_none() {
                    break;
                }
            }
        }
    }

    debug!(%schedule_id, interval_seconds, "Schedule timer stopped");
}

async fn run_storage_writer(
    database: Arc<dyn Database>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<StorageOp>,
) {
    while let Some(op) = rx.recv().await {
        let (what, result) = match op {
            StorageOp::Create(schedule) => (
                "creating schedule",
                with_retry(policy, "creating schedule", || database.create_schedule(&schedule))
                    .await,
            ),
            StorageOp::Update(schedule) => (
                "updating schedule",
                with_retry(policy, "updating schedule", || database.update_schedule(&schedule))
                    .await,
            ),
            StorageOp::Delete(id) => (
                "deleting schedule",
                with_retry(policy, "deleting schedule", || database.delete_schedule(id)).await,
            ),
            StorageOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        if let Err(e) = result {
            error!("Failed {}: {:#}", what, e);
        }
    }
}

/// Owns every schedule and its timer
pub struct ScheduleManager {
    shared: Arc<Shared>,
}

impl ScheduleManager {
    /// Must be called from within a Tokio runtime; spawns the schedule writer
    pub fn new(
        registry: Arc<EndpointRegistry>,
        dispatcher: ProbeDispatcher,
        database: Arc<dyn Database>,
        policy: RetryPolicy,
    ) -> Self {
        let (storage_tx, storage_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_storage_writer(database, policy, storage_rx));

        Self {
            shared: Arc::new(Shared {
                map: RwLock::new(ScheduleMap::default()),
                registry,
                dispatcher,
                storage_tx,
                live_timers: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Build schedules for every non-expired registered endpoint, reusing the
    /// identity of persisted schedules where the interval matches.
    ///
    /// Persisted rows with no matching interval, or duplicating one, are deleted.
    pub async fn rebuild(&self, persisted: Vec<Schedule>) -> usize {
        let now = Utc::now();
        let endpoints = self.shared.registry.snapshot(|e| !e.is_expired(now)).await;

        let mut groups: HashMap<u64, BTreeSet<i64>> = HashMap::new();
        for endpoint in &endpoints {
            if let Some(reason) = validate_interval(endpoint.interval_seconds).error {
                warn!(endpoint_id = endpoint.id, "Not scheduling stored endpoint: {}", reason);
                continue;
            }
            groups.entry(endpoint.interval_seconds).or_default().insert(endpoint.id);
        }

        let mut map = self.shared.map.write().await;
        let mut adopted: HashMap<u64, Schedule> = HashMap::new();
        for stored in persisted {
            let reusable = groups.contains_key(&stored.interval_seconds)
                && !map.by_interval.contains_key(&stored.interval_seconds)
                && !adopted.contains_key(&stored.interval_seconds);
            if reusable {
                adopted.insert(stored.interval_seconds, stored);
            } else {
                debug!(schedule_id = %stored.id, "Dropping stale persisted schedule");
                self.shared.persist(StorageOp::Delete(stored.id));
            }
        }

        for (interval, members) in groups {
            if map.by_interval.contains_key(&interval) {
                continue;
            }

            let (schedule, op) = match adopted.remove(&interval) {
                Some(mut stored) => {
                    stored.endpoint_ids = members.clone();
                    let op = StorageOp::Update(stored.clone());
                    (stored, op)
                }
                None => {
                    let mut fresh = Schedule::new(interval);
                    fresh.endpoint_ids = members.clone();
                    let op = StorageOp::Create(fresh.clone());
                    (fresh, op)
                }
            };

            for id in &members {
                map.membership.insert(*id, interval);
            }
            let mut entry = ScheduleEntry::new(schedule);
            entry.start(Arc::downgrade(&self.shared), self.shared.live_timers.clone());
            map.by_interval.insert(interval, entry);
            self.shared.persist(op);
        }

        info!(
            schedule_count = map.by_interval.len(),
            endpoint_count = map.membership.len(),
            "Schedules built"
        );
        map.by_interval.len()
    }

    /// Put a registered endpoint into the schedule for its interval
    pub async fn add_endpoint(&self, endpoint: &Endpoint) -> MonitorResult<Schedule> {
        self.place(endpoint.id, endpoint.interval_seconds).await
    }

    /// Take an endpoint out of its schedule, destroying the schedule if it
    /// empties. Returns `false` when the endpoint was not scheduled.
    pub async fn remove_endpoint(&self, endpoint_id: i64) -> bool {
        let mut map = self.shared.map.write().await;
        self.detach_locked(&mut map, endpoint_id)
    }

    /// Move an endpoint to the schedule for `new_interval` in one step; no
    /// tick observes it in both schedules or in neither.
    pub async fn change_interval(
        &self,
        endpoint_id: i64,
        new_interval: u64,
    ) -> MonitorResult<Schedule> {
        self.place(endpoint_id, new_interval).await
    }

    pub async fn rename(&self, schedule_id: Uuid, name: &str) -> MonitorResult<Schedule> {
        let mut map = self.shared.map.write().await;
        let entry = map.find_mut(schedule_id).ok_or(MonitorError::ScheduleNotFound(schedule_id))?;

        entry.schedule.name = name.trim().to_string();
        let schedule = entry.schedule.clone();
        self.shared.persist(StorageOp::Update(schedule.clone()));
        Ok(schedule)
    }

    /// All live schedules, ordered by interval
    pub async fn list(&self) -> Vec<Schedule> {
        let map = self.shared.map.read().await;
        let mut schedules: Vec<Schedule> =
            map.by_interval.values().map(|e| e.schedule.clone()).collect();
        schedules.sort_by_key(|s| s.interval_seconds);
        schedules
    }

    pub async fn get(&self, schedule_id: Uuid) -> Option<Schedule> {
        self.shared.map.read().await.find(schedule_id).map(|e| e.schedule.clone())
    }

    pub async fn get_by_interval(&self, interval_seconds: u64) -> Option<Schedule> {
        let map = self.shared.map.read().await;
        map.by_interval.get(&interval_seconds).map(|e| e.schedule.clone())
    }

    /// The schedule an endpoint currently belongs to
    pub async fn schedule_of(&self, endpoint_id: i64) -> Option<Schedule> {
        let map = self.shared.map.read().await;
        let interval = map.membership.get(&endpoint_id)?;
        map.by_interval.get(interval).map(|e| e.schedule.clone())
    }

    pub async fn state(&self, schedule_id: Uuid) -> Option<ScheduleState> {
        self.shared.map.read().await.find(schedule_id).map(|e| e.state)
    }

    /// Schedules whose timer is running
    pub async fn active_count(&self) -> usize {
        let map = self.shared.map.read().await;
        map.by_interval.values().filter(|e| e.state == ScheduleState::Running).count()
    }

    /// Timer tasks that have not yet exited
    pub fn live_timers(&self) -> usize {
        self.shared.live_timers.load(Ordering::SeqCst)
    }

    /// Wait until every schedule change made so far has reached storage
    pub async fn sync_storage(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.storage_tx.send(StorageOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop every timer. Persisted schedules are kept for the next start.
    pub async fn shutdown(&self) {
        let mut map = self.shared.map.write().await;
        for entry in map.by_interval.values_mut() {
            entry.stop();
        }
        let stopped = map.by_interval.len();
        map.by_interval.clear();
        map.membership.clear();
        info!(stopped, "Schedules stopped");
    }

    /// Registry before schedule map: while the registry guard is held the
    /// endpoint cannot be removed, so it is never placed after its removal.
    async fn place(&self, endpoint_id: i64, interval: u64) -> MonitorResult<Schedule> {
        validate_interval(interval).into_result()?;

        let registered = self.shared.registry.read().await;
        if !registered.contains_key(&endpoint_id) {
            return Err(MonitorError::EndpointNotFound(endpoint_id));
        }

        let mut map = self.shared.map.write().await;
        Ok(self.place_locked(&mut map, endpoint_id, interval))
    }

    fn place_locked(&self, map: &mut ScheduleMap, endpoint_id: i64, interval: u64) -> Schedule {
        if let Some(&current) = map.membership.get(&endpoint_id) {
            if current == interval {
                if let Some(entry) = map.by_interval.get(&interval) {
                    return entry.schedule.clone();
                }
            }
            self.detach_locked(map, endpoint_id);
        }

        let schedule = match map.by_interval.entry(interval) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.schedule.endpoint_ids.insert(endpoint_id);
                self.shared.persist(StorageOp::Update(entry.schedule.clone()));
                entry.schedule.clone()
            }
            Entry::Vacant(vacant) => {
                let mut schedule = Schedule::new(interval);
                schedule.endpoint_ids.insert(endpoint_id);

                let entry = vacant.insert(ScheduleEntry::new(schedule));
                entry.start(Arc::downgrade(&self.shared), self.shared.live_timers.clone());
                info!(schedule_id = %entry.schedule.id, interval, "Schedule created");
                self.shared.persist(StorageOp::Create(entry.schedule.clone()));
                entry.schedule.clone()
            }
        };

        map.membership.insert(endpoint_id, interval);
        debug!(endpoint_id, interval, schedule_id = %schedule.id, "Endpoint scheduled");
        schedule
    }

    fn detach_locked(&self, map: &mut ScheduleMap, endpoint_id: i64) -> bool {
        let Some(interval) = map.membership.remove(&endpoint_id) else {
            return false;
        };

        let emptied = match map.by_interval.get_mut(&interval) {
            Some(entry) => {
                entry.schedule.endpoint_ids.remove(&endpoint_id);
                if entry.schedule.endpoint_ids.is_empty() {
                    true
                } else {
                    self.shared.persist(StorageOp::Update(entry.schedule.clone()));
                    false
                }
            }
            None => false,
        };

        if emptied {
            if let Some(mut entry) = map.by_interval.remove(&interval) {
                entry.stop();
                info!(schedule_id = %entry.schedule.id, interval, "Schedule destroyed");
                self.shared.persist(StorageOp::Delete(entry.schedule.id));
            }
        }

        debug!(endpoint_id, interval, "Endpoint unscheduled");
        true
    }
}
