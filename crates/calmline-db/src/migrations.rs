//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time and applied in order on
//! startup. Applied names are tracked in `_calmline_migrations`; each
//! migration runs exactly once, inside its own transaction.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_practice_profiles",
        sql: include_str!("migrations/000_practice_profiles.sql"),
    },
    Migration {
        name: "001_knowledge_entries",
        sql: include_str!("migrations/001_knowledge_entries.sql"),
    },
    Migration {
        name: "002_conversation_turns",
        sql: include_str!("migrations/002_conversation_turns.sql"),
    },
    Migration {
        name: "003_escalation_events",
        sql: include_str!("migrations/003_escalation_events.sql"),
    },
    Migration {
        name: "004_staff_notifications",
        sql: include_str!("migrations/004_staff_notifications.sql"),
    },
    Migration {
        name: "005_intake_records",
        sql: include_str!("migrations/005_intake_records.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

impl MigrationError {
    fn failed(name: &str) -> impl FnOnce(rusqlite::Error) -> Self {
        let name = name.to_string();
        move |source| Self::ExecutionFailed { name, source }
    }
}

/// Runs all pending migrations against the given connection.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _calmline_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(MigrationError::failed("_calmline_migrations_bootstrap"))?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _calmline_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        let tx = conn
            .unchecked_transaction()
            .map_err(MigrationError::failed(migration.name))?;
        tx.execute_batch(migration.sql)
            .map_err(MigrationError::failed(migration.name))?;
        tx.execute(
            "INSERT INTO _calmline_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(MigrationError::failed(migration.name))?;
        tx.commit().map_err(MigrationError::failed(migration.name))?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM _calmline_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(count, MIGRATIONS.len());
    }

    #[test]
    fn run_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATIONS.len());

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn migration_side_effects_roll_back_when_tracking_insert_fails() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [Migration {
            name: "001_tracking_insert_conflict",
            sql: "
                CREATE TABLE rollback_scratch (id INTEGER PRIMARY KEY);
                INSERT INTO _calmline_migrations (name) VALUES ('001_tracking_insert_conflict');
            ",
        }];

        let err = run_migrations_from_list(&conn, &migrations)
            .expect_err("tracking insert conflict should fail migration");

        match err {
            MigrationError::ExecutionFailed { name, .. } => {
                assert_eq!(name, "001_tracking_insert_conflict")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'rollback_scratch')",
                [],
                |row| row.get(0),
            )
            .expect("should query sqlite_master");
        assert!(!exists, "schema side effects should be rolled back");
    }
}
