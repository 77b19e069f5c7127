//! In-memory `Database` double with failure injection, for unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use uuid::Uuid;

use super::Database;
use super::models::{Endpoint, HealthCheck, NewEndpoint, Schedule};
use crate::monitoring::types::{EndpointStatus, ProbeResult};

#[derive(Default)]
struct State {
    next_id: i64,
    endpoints: BTreeMap<i64, Endpoint>,
    schedules: HashMap<Uuid, Schedule>,
    health_checks: Vec<HealthCheck>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    fail_writes: AtomicBool,
    fail_next: AtomicU32,
    fail_loads: AtomicBool,
    delete_gate: RwLock<()>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `n` writes fail, later ones succeed
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Endpoint deletes wait until the returned guard is dropped
    pub async fn hold_deletes(&self) -> RwLockWriteGuard<'_, ()> {
        self.delete_gate.write().await
    }

    /// Seed an endpoint without going through failure injection
    pub async fn insert(&self, endpoint: NewEndpoint) -> Endpoint {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let stored = endpoint.into_endpoint(state.next_id, Utc::now());
        state.endpoints.insert(stored.id, stored.clone());
        stored
    }

    pub async fn endpoint(&self, id: i64) -> Option<Endpoint> {
        self.state.lock().await.endpoints.get(&id).cloned()
    }

    pub async fn endpoint_count(&self) -> usize {
        self.state.lock().await.endpoints.len()
    }

    pub async fn health_check_count(&self) -> usize {
        self.state.lock().await.health_checks.len()
    }

    pub async fn stored_schedules(&self) -> Vec<Schedule> {
        self.state.lock().await.schedules.values().cloned().collect()
    }

    pub async fn seed_schedule(&self, schedule: Schedule) {
        self.state.lock().await.schedules.insert(schedule.id, schedule);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("injected storage failure"));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(anyhow!("injected transient storage failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn load_endpoints(&self) -> Result<Vec<Endpoint>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("injected load failure"));
        }
        Ok(self.state.lock().await.endpoints.values().cloned().collect())
    }

    async fn create_endpoint(&self, endpoint: &NewEndpoint) -> Result<Endpoint> {
        self.check_write()?;
        Ok(self.insert(endpoint.clone()).await)
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        match state.endpoints.get_mut(&endpoint.id) {
            Some(stored) => {
                *stored = endpoint.clone();
                Ok(())
            }
            None => Err(anyhow!("Endpoint {} does not exist in storage", endpoint.id)),
        }
    }

    async fn delete_endpoint(&self, id: i64) -> Result<()> {
        let _gate = self.delete_gate.read().await;
        self.check_write()?;
        let mut state = self.state.lock().await;
        state.endpoints.remove(&id);
        state.health_checks.retain(|check| check.endpoint_id != id);
        Ok(())
    }

    async fn load_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.stored_schedules().await)
    }

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.check_write()?;
        self.state.lock().await.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.check_write()?;
        self.state.lock().await.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        self.check_write()?;
        self.state.lock().await.schedules.remove(&id);
        Ok(())
    }

    async fn record_health_check(&self, result: &ProbeResult) -> Result<i64> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let id = state.health_checks.len() as i64 + 1;
        state.health_checks.push(HealthCheck::from_probe_result(id, result));
        Ok(id)
    }

    async fn update_endpoint_status(
        &self,
        id: i64,
        status: EndpointStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_write()?;
        if let Some(stored) = self.state.lock().await.endpoints.get_mut(&id) {
            stored.status = status;
            stored.last_checked = Some(checked_at);
        }
        Ok(())
    }

    async fn recent_health_checks(&self, endpoint_id: i64, limit: usize) -> Result<Vec<HealthCheck>> {
        let state = self.state.lock().await;
        Ok(state
            .health_checks
            .iter()
            .rev()
            .filter(|check| check.endpoint_id == endpoint_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_health_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let before = state.health_checks.len();
        state.health_checks.retain(|check| check.checked_at >= cutoff);
        Ok((before - state.health_checks.len()) as u64)
    }
}
