use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Brings the schema up to `SCHEMA_VERSION`, recording each applied step in
/// `schema_migrations` so reruns are no-ops.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Endpoints, schedules and health checks").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Index health checks by endpoint and time").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: endpoints, schedules and health_checks
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS endpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT,
            url TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'unknown',
            last_checked INTEGER,
            expires_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // endpoint_ids holds a JSON array of endpoint ids
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            endpoint_ids TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS health_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint_id INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            status_code INTEGER,
            response TEXT NOT NULL DEFAULT '',
            checked_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_endpoints_owner ON endpoints(owner)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_endpoints_expires_at ON endpoints(expires_at)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_schedules_interval ON schedules(interval_seconds)", ()).await?;

    Ok(())
}

/// Migration v2: history lookups and retention both scan by endpoint and time
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_health_checks_endpoint_time ON health_checks(endpoint_id, checked_at DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_health_checks_checked_at ON health_checks(checked_at)",
        (),
    )
    .await?;

    Ok(())
}
