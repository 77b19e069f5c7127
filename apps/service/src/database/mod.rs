/// Database abstraction layer
///
/// The `Database` trait is the storage collaborator the engine talks to;
/// `DatabaseImpl` backs it with LibSQL (SQLite) through a connection pool.

pub mod migrations;
pub mod models;
pub mod repository;
pub mod status;

#[cfg(test)]
pub mod memory;

pub use repository::{Database, DatabaseImpl};
pub use status::StatusStore;

use anyhow::Result;

use crate::pool::{DEFAULT_POOL_SIZE, build_pool};

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open (or create) a local database file, build the pool and migrate it
pub async fn open_local(path: &str) -> Result<DatabaseImpl> {
    let db = libsql::Builder::new_local(path).build().await?;
    let pool = build_pool(db, DEFAULT_POOL_SIZE)?;

    let conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get database connection: {e}"))?;
    initialize_database(&conn).await?;

    Ok(DatabaseImpl::new_from_pool(pool))
}
