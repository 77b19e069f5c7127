/// Integration tests for orchestrator components
///
/// These tests verify end-to-end functionality of:
/// - Probe results flowing into status, streaks and alerts
/// - Expiry sweeps shrinking and destroying schedules
/// - Endpoint and schedule operations
/// - Persistence across a restart on a real libsql file
use crate::config::MonitoringConfig;
use crate::database::memory::MemoryDatabase;
use crate::database::models::{Endpoint, EndpointUpdate, NewEndpoint};
use crate::database::{Database, DatabaseImpl, open_local};
use crate::events::MonitorEvent;
use crate::monitoring::checker::Checker;
use crate::monitoring::types::{EndpointStatus, ProbeResult};
use crate::orchestrator::{NewSchedule, Orchestrator, ScheduleUpdate};
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// 200 for every URL except those containing "fails", which get 500
struct ScriptedChecker;

#[async_trait::async_trait]
impl Checker for ScriptedChecker {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
        let code = if endpoint.url.contains("fails") { 500 } else { 200 };
        ProbeResult::new(endpoint.id, endpoint.url.clone())
            .completed(code, "body".to_string(), 3)
            .with_attempts(1)
    }
}

fn quiet_config() -> MonitoringConfig {
    MonitoringConfig { probe_on_create: false, ..MonitoringConfig::default() }
}

async fn start_in_memory(config: MonitoringConfig) -> (Arc<MemoryDatabase>, Orchestrator) {
    let database = Arc::new(MemoryDatabase::new());
    let orchestrator =
        Orchestrator::start_with_checker(config, database.clone(), Arc::new(ScriptedChecker))
            .await
            .unwrap();
    (database, orchestrator)
}

/// Helper to create a test database; the directory must outlive the database
async fn create_test_database() -> Result<(TempDir, Arc<DatabaseImpl>)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let database = open_local(&db_path.to_string_lossy()).await?;
    Ok((temp_dir, Arc::new(database)))
}

async fn settle(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_probe_cycle_and_expiry_sweep() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;
    let mut events = orchestrator.events().subscribe();

    let ok = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 5)).await.unwrap();
    let failing =
        orchestrator.create_endpoint(NewEndpoint::new("http://fails", 5)).await.unwrap();
    assert_eq!(ok.status, EndpointStatus::Unknown);

    settle(5).await;
    let probed = orchestrator.get_endpoint(None, ok.id).await.unwrap();
    assert_eq!(probed.status, EndpointStatus::Ok);
    assert!(probed.last_checked.is_some());

    settle(10).await;
    assert_eq!(orchestrator.tracker().streak(failing.id).count, 3);
    assert_eq!(
        orchestrator.get_endpoint(None, failing.id).await.unwrap().status,
        EndpointStatus::Degraded
    );

    settle(10).await;
    assert_eq!(orchestrator.tracker().streak(failing.id).count, 5);

    let mut alerts = 0;
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::Alert { endpoint_id, failures, .. } = event {
            assert_eq!(endpoint_id, failing.id);
            assert_eq!(failures, 3);
            alerts += 1;
        }
    }
    assert_eq!(alerts, 1);
    assert!(database.health_check_count().await >= 10);
    assert_eq!(database.endpoint(ok.id).await.unwrap().status, EndpointStatus::Ok);

    orchestrator
        .update_endpoint(None, ok.id, EndpointUpdate::expiry(Utc::now() - TimeDelta::seconds(1)))
        .await
        .unwrap();
    let report = orchestrator.reaper().sweep(Utc::now()).await;
    assert_eq!(report.removed, vec![ok.id]);

    let schedule = orchestrator.get_schedule_by_interval(5).await.unwrap();
    assert_eq!(schedule.endpoint_ids, BTreeSet::from([failing.id]));

    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_probe_on_create_runs_immediately() {
    let (database, orchestrator) = start_in_memory(MonitoringConfig::default()).await;

    let endpoint = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 300)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        orchestrator.get_endpoint(None, endpoint.id).await.unwrap().status,
        EndpointStatus::Ok
    );
    assert_eq!(database.health_check_count().await, 1);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovery_is_reported() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;
    let mut events = orchestrator.events().subscribe();

    let endpoint =
        orchestrator.create_endpoint(NewEndpoint::new("http://fails", 5)).await.unwrap();
    settle(15).await;

    orchestrator
        .update_endpoint(
            None,
            endpoint.id,
            EndpointUpdate { url: Some("http://ok".to_string()), ..EndpointUpdate::default() },
        )
        .await
        .unwrap();
    settle(5).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(MonitorEvent::Alert { .. })));
    assert!(matches!(seen.last(), Some(MonitorEvent::Recovered { failures: 3, .. })));
    assert_eq!(orchestrator.tracker().streak(endpoint.id).count, 0);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_create_endpoint_validation() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;

    let bad_url = orchestrator.create_endpoint(NewEndpoint::new("ftp://x", 5)).await;
    assert!(bad_url.unwrap_err().is_validation());

    let zero = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 0)).await;
    assert!(zero.unwrap_err().is_validation());

    let huge = orchestrator.create_endpoint(NewEndpoint::new("http://ok", u64::MAX)).await;
    assert!(huge.unwrap_err().is_validation());

    assert_eq!(database.endpoint_count().await, 0);
    assert!(orchestrator.list_schedules().await.is_empty());
    assert_eq!(orchestrator.schedules().live_timers(), 0);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_create_endpoint_applies_default_expiry() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;
    let before = Utc::now();

    let endpoint = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 5)).await.unwrap();
    let expires_at = endpoint.expires_at.unwrap();
    assert!(expires_at >= before + TimeDelta::days(30));
    assert!(expires_at <= Utc::now() + TimeDelta::days(30));

    let explicit = Utc::now() + TimeDelta::hours(2);
    let endpoint = orchestrator
        .create_endpoint(NewEndpoint::new("http://ok", 5).with_expiry(explicit))
        .await
        .unwrap();
    assert_eq!(endpoint.expires_at, Some(explicit));
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_on_create_registers_nothing() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;
    database.set_fail_writes(true);

    let err = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 5)).await.unwrap_err();
    assert!(!err.is_validation());
    assert!(orchestrator.list_endpoints(None).await.is_empty());
    assert!(orchestrator.list_schedules().await.is_empty());

    database.set_fail_writes(false);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_owner_scoping() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;

    let alice = orchestrator
        .create_endpoint(NewEndpoint::new("http://ok/a", 5).with_owner("alice"))
        .await
        .unwrap();
    orchestrator
        .create_endpoint(NewEndpoint::new("http://ok/b", 5).with_owner("bob"))
        .await
        .unwrap();

    assert_eq!(orchestrator.list_endpoints(Some("alice")).await.len(), 1);
    assert_eq!(orchestrator.list_endpoints(None).await.len(), 2);

    let hidden = orchestrator.get_endpoint(Some("bob"), alice.id).await.unwrap_err();
    assert!(hidden.is_not_found());
    let denied = orchestrator.delete_endpoint(Some("bob"), alice.id).await.unwrap_err();
    assert!(denied.is_not_found());
    assert!(orchestrator.get_endpoint(Some("alice"), alice.id).await.is_ok());
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_through_update() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;

    let a = orchestrator.create_endpoint(NewEndpoint::new("http://ok/a", 5)).await.unwrap();
    let b = orchestrator.create_endpoint(NewEndpoint::new("http://ok/b", 5)).await.unwrap();

    let updated = orchestrator
        .update_endpoint(None, a.id, EndpointUpdate::interval(60))
        .await
        .unwrap();
    assert_eq!(updated.interval_seconds, 60);

    let intervals: Vec<u64> =
        orchestrator.list_schedules().await.iter().map(|s| s.interval_seconds).collect();
    assert_eq!(intervals, vec![5, 60]);
    assert_eq!(
        orchestrator.get_schedule_by_interval(5).await.unwrap().endpoint_ids,
        BTreeSet::from([b.id])
    );

    let zero = orchestrator.update_endpoint(None, a.id, EndpointUpdate::interval(0)).await;
    assert!(zero.unwrap_err().is_validation());
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_endpoint_leaves_schedule_on_update() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;

    let a = orchestrator.create_endpoint(NewEndpoint::new("http://ok/a", 5)).await.unwrap();
    let b = orchestrator.create_endpoint(NewEndpoint::new("http://ok/b", 5)).await.unwrap();

    let past = Utc::now() - TimeDelta::seconds(1);
    orchestrator.update_endpoint(None, a.id, EndpointUpdate::expiry(past)).await.unwrap();
    assert!(orchestrator.schedules().schedule_of(a.id).await.is_none());

    let updated = orchestrator
        .update_endpoint(None, a.id, EndpointUpdate::interval(60))
        .await
        .unwrap();
    assert_eq!(updated.interval_seconds, 60);
    assert!(orchestrator.schedules().schedule_of(a.id).await.is_none());
    assert!(orchestrator.get_schedule_by_interval(60).await.is_none());
    assert_eq!(
        orchestrator.get_schedule_by_interval(5).await.unwrap().endpoint_ids,
        BTreeSet::from([b.id])
    );
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retried_status_write_keeps_newest_result() {
    let config = MonitoringConfig { status_write_backoff_seconds: 8, ..quiet_config() };
    let (database, orchestrator) = start_in_memory(config).await;

    let endpoint =
        orchestrator.create_endpoint(NewEndpoint::new("http://fails", 5)).await.unwrap();
    orchestrator.schedules().sync_storage().await;
    // the first result's health check write fails once and is retried at t=13
    database.fail_next_writes(1);
    settle(5).await;

    orchestrator
        .update_endpoint(
            None,
            endpoint.id,
            EndpointUpdate { url: Some("http://ok".to_string()), ..EndpointUpdate::default() },
        )
        .await
        .unwrap();
    settle(5).await;
    settle(3).await;

    let stored = database.endpoint(endpoint.id).await.unwrap();
    let current = orchestrator.get_endpoint(None, endpoint.id).await.unwrap();
    assert_eq!(current.status, EndpointStatus::Ok);
    assert_eq!(stored.status, EndpointStatus::Ok);
    assert_eq!(stored.last_checked, current.last_checked);
    assert_eq!(database.health_check_count().await, 2);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_endpoint_destroys_sole_schedule() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;

    let endpoint = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 5)).await.unwrap();
    orchestrator.delete_endpoint(None, endpoint.id).await.unwrap();

    assert!(orchestrator.list_schedules().await.is_empty());
    assert_eq!(orchestrator.schedules().active_count().await, 0);
    assert_eq!(database.endpoint_count().await, 0);

    let again = orchestrator.delete_endpoint(None, endpoint.id).await.unwrap_err();
    assert!(again.is_not_found());
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_keeps_endpoint_scheduled() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;

    let endpoint = orchestrator.create_endpoint(NewEndpoint::new("http://ok", 5)).await.unwrap();
    orchestrator.schedules().sync_storage().await;
    database.set_fail_writes(true);

    assert!(orchestrator.delete_endpoint(None, endpoint.id).await.is_err());
    assert!(orchestrator.schedules().schedule_of(endpoint.id).await.is_some());
    assert!(orchestrator.get_endpoint(None, endpoint.id).await.is_ok());

    database.set_fail_writes(false);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_schedule_lifecycle() {
    let (database, orchestrator) = start_in_memory(quiet_config()).await;

    let a = orchestrator.create_endpoint(NewEndpoint::new("http://ok/a", 5)).await.unwrap();
    let b = orchestrator.create_endpoint(NewEndpoint::new("http://ok/b", 60)).await.unwrap();

    let schedule = orchestrator
        .create_schedule(
            None,
            NewSchedule {
                name: Some("Homepage".to_string()),
                interval_seconds: 30,
                endpoint_ids: vec![a.id, b.id],
            },
        )
        .await
        .unwrap();
    assert_eq!(schedule.name, "Homepage");
    assert_eq!(schedule.endpoint_ids, BTreeSet::from([a.id, b.id]));
    assert_eq!(orchestrator.list_schedules().await.len(), 1);
    assert_eq!(database.endpoint(a.id).await.unwrap().interval_seconds, 30);

    let retimed = orchestrator
        .update_schedule(
            None,
            schedule.id,
            ScheduleUpdate { interval_seconds: Some(120), ..ScheduleUpdate::default() },
        )
        .await
        .unwrap();
    assert_eq!(retimed.interval_seconds, 120);
    assert_eq!(retimed.name, "Homepage");
    assert_ne!(retimed.id, schedule.id);
    assert!(orchestrator.get_schedule(schedule.id).await.unwrap_err().is_not_found());

    let renamed = orchestrator
        .update_schedule(
            None,
            retimed.id,
            ScheduleUpdate { name: Some("Slow".to_string()), ..ScheduleUpdate::default() },
        )
        .await
        .unwrap();
    assert_eq!(renamed.id, retimed.id);
    assert_eq!(renamed.name, "Slow");

    orchestrator.delete_schedule(None, renamed.id).await.unwrap();
    assert!(orchestrator.list_schedules().await.is_empty());
    assert!(orchestrator.list_endpoints(None).await.is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_schedule_validation() {
    let (_database, orchestrator) = start_in_memory(quiet_config()).await;
    let a = orchestrator
        .create_endpoint(NewEndpoint::new("http://ok", 5).with_owner("alice"))
        .await
        .unwrap();

    let empty = orchestrator
        .create_schedule(None, NewSchedule { name: None, interval_seconds: 5, endpoint_ids: vec![] })
        .await;
    assert!(empty.unwrap_err().is_validation());

    let unknown = orchestrator
        .create_schedule(None, NewSchedule { name: None, interval_seconds: 5, endpoint_ids: vec![999] })
        .await;
    assert!(unknown.unwrap_err().is_validation());

    let foreign = orchestrator
        .create_schedule(
            Some("bob"),
            NewSchedule { name: None, interval_seconds: 10, endpoint_ids: vec![a.id] },
        )
        .await;
    assert!(foreign.unwrap_err().is_validation());
    assert_eq!(orchestrator.get_endpoint(None, a.id).await.unwrap().interval_seconds, 5);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let (_dir, database) = create_test_database().await?;

    let first = Orchestrator::start_with_checker(
        quiet_config(),
        database.clone(),
        Arc::new(ScriptedChecker),
    )
    .await?;
    let a = first.create_endpoint(NewEndpoint::new("http://ok/a", 60)).await?;
    let b = first.create_endpoint(NewEndpoint::new("http://ok/b", 60)).await?;
    let schedule = first.get_schedule_by_interval(60).await.unwrap();
    first.schedules().rename(schedule.id, "Every minute").await?;
    first.shutdown().await;

    let second = Orchestrator::start_with_checker(
        quiet_config(),
        database.clone(),
        Arc::new(ScriptedChecker),
    )
    .await?;

    let restored = second.get_schedule_by_interval(60).await.unwrap();
    assert_eq!(restored.id, schedule.id);
    assert_eq!(restored.name, "Every minute");
    assert_eq!(restored.endpoint_ids, BTreeSet::from([a.id, b.id]));
    assert_eq!(second.list_endpoints(None).await.len(), 2);

    second.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_stale_persisted_schedules_are_cleaned_up() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let endpoint = database.create_endpoint(&NewEndpoint::new("http://ok", 15)).await?;

    let mut orphan = crate::database::models::Schedule::new(3600);
    orphan.endpoint_ids.insert(endpoint.id);
    database.create_schedule(&orphan).await?;

    let orchestrator = Orchestrator::start_with_checker(
        quiet_config(),
        database.clone(),
        Arc::new(ScriptedChecker),
    )
    .await?;
    orchestrator.schedules().sync_storage().await;

    let stored = database.load_schedules().await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].interval_seconds, 15);
    assert_eq!(stored[0].endpoint_ids, BTreeSet::from([endpoint.id]));

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_health_history_roundtrip_on_libsql() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let orchestrator = Orchestrator::start_with_checker(
        MonitoringConfig::default(),
        database.clone(),
        Arc::new(ScriptedChecker),
    )
    .await?;

    let endpoint = orchestrator.create_endpoint(NewEndpoint::new("http://fails", 60)).await?;

    let mut checks = Vec::new();
    for _ in 0..50 {
        checks = orchestrator.recent_checks(None, endpoint.id, 10).await?;
        if !checks.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status_code, Some(500));
    assert_eq!(checks[0].response, "body");

    orchestrator.delete_endpoint(None, endpoint.id).await?;
    assert!(database.recent_health_checks(endpoint.id, 10).await?.is_empty());

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_load_failure_is_fatal() {
    let database = Arc::new(MemoryDatabase::new());
    database.set_fail_loads(true);

    let started =
        Orchestrator::start_with_checker(quiet_config(), database, Arc::new(ScriptedChecker)).await;
    assert!(started.is_err());
}
