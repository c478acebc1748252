//! Persistence layer: a SQLite pool plus the fixed schema from spec §3.
//!
//! Exposes the connection pool directly rather than wrapping every query —
//! callers use `sqlx::query`/`query_as` against `Db::pool()`, the same
//! direct-pool-write pattern the teacher crate's messaging tables use
//! (`src/messaging/contacts.rs`, `src/messaging/audit.rs`), because these
//! tables see one write per externally-triggered action rather than a
//! write-contended hot path that would need a single-writer actor.

mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use thiserror::Error;

/// Errors from opening or migrating the database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("schema migration failed: {0}")]
    Migrate(#[source] sqlx::Error),
}

/// Thin wrapper around the connection pool. Construction always applies
/// the fixed schema, so a freshly opened `Db` is immediately usable.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if necessary) the database at `url` and apply the
    /// schema. `url` is a SQLite connection string, e.g.
    /// `sqlite://gateway.db` or `sqlite::memory:` for tests.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(DbError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .map_err(DbError::Connect)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open an in-memory database for tests — a fresh, isolated instance
    /// per call (SQLite's `:memory:` URL is private per-connection, so the
    /// pool is capped at one connection to avoid each checkout seeing an
    /// empty database).
    pub async fn connect_in_memory() -> Result<Self, DbError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DbError::Connect)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(DbError::Connect)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Migrate)?;
        for stmt in schema::STATEMENTS {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Migrate)?;
        }
        tx.commit().await.map_err(DbError::Migrate)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = Db::connect_in_memory().await.expect("connect");
        db.migrate().await.expect("second migrate should be a no-op");
    }

    #[tokio::test]
    async fn schema_has_expected_tables() {
        let db = Db::connect_in_memory().await.expect("connect");
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
                .fetch_all(db.pool())
                .await
                .expect("query");
        let names: Vec<String> = rows.into_iter().map(|(n,)| n).collect();
        for expected in ["organizations", "agent_channels", "usage_logs", "audit_log", "dead_letters"] {
            assert!(names.contains(&expected.to_owned()), "missing table {expected}");
        }
    }
}
