use deadpool::managed::{self, BuildError, Pool, PoolConfig, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// Upper bound on pooled connections to the local monitor database.
pub const DEFAULT_POOL_SIZE: usize = 16;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Hands out connections to the monitor's LibSQL file.
///
/// Fresh connections wait up to `BUSY_TIMEOUT_MS` on a locked file instead of
/// failing straight away, since the status writer and API handlers share it.
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Connection, LibsqlError> {
        let conn = self.database.connect()?;
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ()).await?;
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut Connection, _: &managed::Metrics) -> RecycleResult<LibsqlError> {
        let mut rows = conn.query("SELECT 1", ()).await?;
        match rows.next().await? {
            Some(_) => Ok(()),
            None => Err(LibsqlError::QueryReturnedNoRows.into()),
        }
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Build a pool of at most `max_size` connections over `database`.
pub fn build_pool(database: Database, max_size: usize) -> Result<LibsqlPool, BuildError> {
    LibsqlPool::builder(LibsqlManager::new(database))
        .config(PoolConfig::new(max_size.max(1)))
        .build()
}
