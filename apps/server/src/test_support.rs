use std::sync::Arc;

use actix_web::web;
use pingwatch_service::config::MonitoringConfig;
use pingwatch_service::{Orchestrator, open_local};
use tempfile::TempDir;

/// Orchestrator on a fresh libsql file; keep the directory alive for the test
pub async fn orchestrator() -> (TempDir, web::Data<Orchestrator>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server-test.db");
    let database = open_local(&path.to_string_lossy()).await.unwrap();

    let config = MonitoringConfig { probe_on_create: false, ..MonitoringConfig::default() };
    let orchestrator = Orchestrator::start(config, Arc::new(database)).await.unwrap();
    (dir, web::Data::new(orchestrator))
}
