//! Connection pool creation and configuration.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Applies the per-connection pragmas every pooled connection needs.
///
/// WAL is required for file databases; in-memory databases report
/// `memory` and are accepted as-is.
fn prepare_connection(conn: &mut rusqlite::Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if !matches!(journal_mode.as_str(), "wal" | "memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode stayed {} after requesting WAL", journal_mode)),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))
}

/// Opens (creating if needed) the call database at `db_path`.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if no connection can be established.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| prepare_connection(conn, busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        busy_timeout_ms,
        "database pool created"
    );
    Ok(pool)
}

/// Creates a single-connection in-memory pool.
///
/// Every `:memory:` connection is its own database, so the pool is capped at
/// one connection to keep all callers looking at the same schema and rows.
/// Intended for tests and local experiments.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection cannot be opened.
pub fn create_memory_pool() -> Result<DbPool, PoolError> {
    create_pool(
        ":memory:",
        DbRuntimeSettings {
            pool_max_size: 1,
            ..DbRuntimeSettings::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_file_pool_applies_pragmas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calmline.db");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
        };

        let pool = create_pool(path.to_str().expect("utf-8 path"), settings)
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "pool max size should match settings");
    }

    #[test]
    fn memory_pool_shares_one_database() {
        let pool = create_memory_pool().expect("memory pool");
        assert_eq!(pool.max_size(), 1);

        {
            let conn = pool.get().expect("first checkout");
            conn.execute_batch("CREATE TABLE scratch (id INTEGER PRIMARY KEY);")
                .expect("create table");
        }

        let conn = pool.get().expect("second checkout");
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'scratch')",
                [],
                |row| row.get(0),
            )
            .expect("query sqlite_master");
        assert!(exists, "table created on the first checkout should persist");
    }
}
