//! Database layer for the Calmline call engine.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Domain crates own their own queries; this
//! crate only owns the schema and the pool.
//!
//! The live call path never depends on the database for control flow.
//! Callers run queries inside `spawn_blocking` and treat failures as
//! degraded persistence, not as call failures.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_memory_pool, create_pool, DbPool, DbRuntimeSettings, PoolError};
