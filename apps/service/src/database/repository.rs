use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::models::{
    Endpoint, HealthCheck, NewEndpoint, Schedule, i64_to_timestamp, timestamp_to_i64,
};
use crate::monitoring::types::{EndpointStatus, ProbeResult};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Storage collaborator used by the engine
///
/// Implementations must be safe to call concurrently; the engine never holds
/// one of its own locks while awaiting these methods.
#[async_trait]
pub trait Database: Send + Sync {
    /// Load every stored endpoint
    async fn load_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Insert an endpoint and return it with its assigned id
    async fn create_endpoint(&self, endpoint: &NewEndpoint) -> Result<Endpoint>;

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Delete an endpoint together with its health-check history
    async fn delete_endpoint(&self, id: i64) -> Result<()>;

    /// Load persisted schedules; member ids come back deduplicated
    async fn load_schedules(&self) -> Result<Vec<Schedule>>;

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()>;

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()>;

    async fn delete_schedule(&self, id: Uuid) -> Result<()>;

    /// Append a probe result to the history, returning the row id
    async fn record_health_check(&self, result: &ProbeResult) -> Result<i64>;

    async fn update_endpoint_status(
        &self,
        id: i64,
        status: EndpointStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recent history first
    async fn recent_health_checks(&self, endpoint_id: i64, limit: usize) -> Result<Vec<HealthCheck>>;

    /// Delete history recorded before `cutoff`, returning the number of rows removed
    async fn delete_health_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

const ENDPOINT_COLUMNS: &str =
    "id, owner, url, interval_seconds, status, last_checked, expires_at, created_at, updated_at";

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {e}"))
    }

    fn endpoint_from_row(row: &Row) -> Result<Endpoint> {
        let status: String = row.get(4)?;
        Ok(Endpoint {
            id: row.get(0)?,
            owner: row.get(1)?,
            url: row.get(2)?,
            interval_seconds: row.get::<i64>(3)? as u64,
            status: status.parse().unwrap_or_default(),
            last_checked: row.get::<Option<i64>>(5)?.map(i64_to_timestamp),
            expires_at: row.get::<Option<i64>>(6)?.map(i64_to_timestamp),
            created_at: i64_to_timestamp(row.get(7)?),
            updated_at: i64_to_timestamp(row.get(8)?),
        })
    }

    fn schedule_from_row(row: &Row) -> Result<Schedule> {
        let uuid_str: String = row.get(0)?;
        let members: String = row.get(3)?;
        let endpoint_ids: Vec<i64> = serde_json::from_str(&members)?;

        Ok(Schedule {
            id: Uuid::parse_str(&uuid_str)?,
            name: row.get(1)?,
            interval_seconds: row.get::<i64>(2)? as u64,
            endpoint_ids: endpoint_ids.into_iter().collect::<BTreeSet<_>>(),
            created_at: i64_to_timestamp(row.get(4)?),
        })
    }

    fn members_json(schedule: &Schedule) -> Result<String> {
        Ok(serde_json::to_string(&schedule.endpoint_ids.iter().collect::<Vec<_>>())?)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn load_endpoints(&self) -> Result<Vec<Endpoint>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints ORDER BY id"), ())
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(Self::endpoint_from_row(&row)?);
        }

        Ok(endpoints)
    }

    async fn create_endpoint(&self, endpoint: &NewEndpoint) -> Result<Endpoint> {
        let conn = self.get_conn().await?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO endpoints (owner, url, interval_seconds, status, last_checked, expires_at, created_at, updated_at) VALUES (?, ?, ?, ?, NULL, ?, ?, ?)",
            params![
                endpoint.owner.clone(),
                endpoint.url.clone(),
                endpoint.interval_seconds as i64,
                EndpointStatus::Unknown.to_string(),
                endpoint.expires_at.map(timestamp_to_i64),
                timestamp_to_i64(now),
                timestamp_to_i64(now)
            ],
        )
        .await?;

        let id = conn.last_insert_rowid();
        Ok(endpoint.clone().into_endpoint(id, now))
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let conn = self.get_conn().await?;

        let changed = conn
            .execute(
                "UPDATE endpoints SET owner = ?, url = ?, interval_seconds = ?, expires_at = ?, updated_at = ? WHERE id = ?",
                params![
                    endpoint.owner.clone(),
                    endpoint.url.clone(),
                    endpoint.interval_seconds as i64,
                    endpoint.expires_at.map(timestamp_to_i64),
                    timestamp_to_i64(endpoint.updated_at),
                    endpoint.id
                ],
            )
            .await?;

        if changed == 0 {
            return Err(anyhow!("Endpoint {} does not exist in storage", endpoint.id));
        }
        Ok(())
    }

    async fn delete_endpoint(&self, id: i64) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute("DELETE FROM health_checks WHERE endpoint_id = ?", params![id]).await?;
        conn.execute("DELETE FROM endpoints WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn load_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT uuid, name, interval_seconds, endpoint_ids, created_at FROM schedules ORDER BY created_at",
                (),
            )
            .await?;

        let mut schedules = Vec::new();
        while let Some(row) = rows.next().await? {
            schedules.push(Self::schedule_from_row(&row)?);
        }

        Ok(schedules)
    }

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO schedules (uuid, name, interval_seconds, endpoint_ids, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                schedule.id.to_string(),
                schedule.name.clone(),
                schedule.interval_seconds as i64,
                Self::members_json(schedule)?,
                timestamp_to_i64(schedule.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.get_conn().await?;

        // Upsert, so a schedule whose create was lost still lands
        conn.execute(
            "INSERT INTO schedules (uuid, name, interval_seconds, endpoint_ids, created_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(uuid) DO UPDATE SET
                name = excluded.name,
                interval_seconds = excluded.interval_seconds,
                endpoint_ids = excluded.endpoint_ids",
            params![
                schedule.id.to_string(),
                schedule.name.clone(),
                schedule.interval_seconds as i64,
                Self::members_json(schedule)?,
                timestamp_to_i64(schedule.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute("DELETE FROM schedules WHERE uuid = ?", params![id.to_string()]).await?;
        Ok(())
    }

    async fn record_health_check(&self, result: &ProbeResult) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO health_checks (endpoint_id, outcome, status_code, response, checked_at) VALUES (?, ?, ?, ?, ?)",
            params![
                result.endpoint_id,
                result.outcome.to_string(),
                result.status_code.map(|v| v as i64),
                result.response.clone(),
                timestamp_to_i64(result.checked_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn update_endpoint_status(
        &self,
        id: i64,
        status: EndpointStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "UPDATE endpoints SET status = ?, last_checked = ? WHERE id = ?",
            params![status.to_string(), timestamp_to_i64(checked_at), id],
        )
        .await?;
        Ok(())
    }

    async fn recent_health_checks(&self, endpoint_id: i64, limit: usize) -> Result<Vec<HealthCheck>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, endpoint_id, outcome, status_code, response, checked_at FROM health_checks WHERE endpoint_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?",
                params![endpoint_id, limit as i64],
            )
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            let outcome: String = row.get(2)?;
            checks.push(HealthCheck {
                id: row.get(0)?,
                endpoint_id: row.get(1)?,
                outcome: outcome.parse().map_err(|e: String| anyhow!(e))?,
                status_code: row.get::<Option<i64>>(3)?.map(|v| v as u16),
                response: row.get(4)?,
                checked_at: i64_to_timestamp(row.get(5)?),
            });
        }

        Ok(checks)
    }

    async fn delete_health_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM health_checks WHERE checked_at < ?",
                params![timestamp_to_i64(cutoff)],
            )
            .await?;
        Ok(deleted)
    }
}
