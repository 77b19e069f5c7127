//! In-memory authoritative collection of monitored endpoints.
//!
//! Mutations are write-through: storage is updated first and the in-memory
//! copy only changes once storage accepted the write. No lock is held while
//! storage is awaited.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::{Endpoint, EndpointUpdate, NewEndpoint};
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::types::ProbeResult;

pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<i64, Endpoint>>,
    database: Arc<dyn Database>,
}

impl EndpointRegistry {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { endpoints: RwLock::new(HashMap::new()), database }
    }

    /// Bulk-load every endpoint from storage, replacing the current contents
    pub async fn load(&self) -> MonitorResult<usize> {
        let loaded = self.database.load_endpoints().await?;

        let mut endpoints = self.endpoints.write().await;
        endpoints.clear();
        endpoints.extend(loaded.into_iter().map(|e| (e.id, e)));

        info!(endpoint_count = endpoints.len(), "Loaded endpoints from database");
        Ok(endpoints.len())
    }

    /// Register a new endpoint; storage assigns its id
    pub async fn add(&self, endpoint: NewEndpoint) -> MonitorResult<Endpoint> {
        let stored = self.database.create_endpoint(&endpoint).await?;

        self.endpoints.write().await.insert(stored.id, stored.clone());
        debug!(endpoint_id = stored.id, url = %stored.url, "Endpoint registered");
        Ok(stored)
    }

    /// Apply `update`, returning the endpoint as it was before and after
    pub async fn update(
        &self,
        id: i64,
        update: &EndpointUpdate,
    ) -> MonitorResult<(Endpoint, Endpoint)> {
        let current = self.get(id).await.ok_or(MonitorError::EndpointNotFound(id))?;
        let updated = update.apply_to(&current, Utc::now());

        self.database.update_endpoint(&updated).await?;

        let mut endpoints = self.endpoints.write().await;
        let entry = endpoints.get_mut(&id).ok_or(MonitorError::EndpointNotFound(id))?;
        // Probe results may have landed while storage was busy; keep them
        entry.url = updated.url;
        entry.interval_seconds = updated.interval_seconds;
        entry.expires_at = updated.expires_at;
        entry.updated_at = updated.updated_at;

        debug!(endpoint_id = id, "Endpoint updated");
        Ok((current, entry.clone()))
    }

    /// Remove an endpoint from storage and memory
    pub async fn remove(&self, id: i64) -> MonitorResult<Endpoint> {
        if !self.contains(id).await {
            return Err(MonitorError::EndpointNotFound(id));
        }

        self.database.delete_endpoint(id).await?;

        let removed = self.endpoints.write().await.remove(&id);
        debug!(endpoint_id = id, "Endpoint removed");
        removed.ok_or(MonitorError::EndpointNotFound(id))
    }

    /// Shared view of every registered endpoint; no endpoint is added or
    /// removed while the guard is held
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, Endpoint>> {
        self.endpoints.read().await
    }

    pub async fn get(&self, id: i64) -> Option<Endpoint> {
        self.endpoints.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: i64) -> bool {
        self.endpoints.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    /// Copy of the endpoints matching `predicate`, ordered by id
    pub async fn snapshot<F>(&self, predicate: F) -> Vec<Endpoint>
    where
        F: Fn(&Endpoint) -> bool,
    {
        let mut matching: Vec<Endpoint> = {
            let endpoints = self.endpoints.read().await;
            endpoints.values().filter(|e| predicate(e)).cloned().collect()
        };
        matching.sort_by_key(|e| e.id);
        matching
    }

    /// Record a probe outcome on the in-memory copy.
    ///
    /// Returns `false` when the endpoint is no longer registered.
    pub async fn apply_probe_result(&self, result: &ProbeResult) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(&result.endpoint_id) {
            Some(endpoint) => {
                endpoint.status = result.outcome.into();
                endpoint.last_checked = Some(result.checked_at);
                true
            }
            None => false,
        }
    }
}
