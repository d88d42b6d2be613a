//! Database connection pool management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - Versioned, forward-only schema migrations guarded by
//!   `PRAGMA user_version`, each applied inside a transaction
//! - In-memory mode for testing

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::StateError;

/// Ordered, forward-only migrations. The index + 1 is the schema version.
const MIGRATIONS: &[&str] = &[include_str!("migrations/0001_initial.sql")];

/// Manages a pool of SQLite connections for onedrift state persistence
///
/// The pool is configured with:
/// - WAL journal mode for concurrent read access
/// - 5 max connections for file-based databases
/// - 1 connection for in-memory databases (required for data persistence)
/// - 5-second busy timeout to handle write contention
pub struct StatePool {
    pool: SqlitePool,
}

impl StatePool {
    /// Creates a new pool connected to the specified file
    ///
    /// Creates parent directories and the database file as needed, enables
    /// WAL mode, and brings the schema up to the current version.
    ///
    /// # Errors
    ///
    /// Returns `StateError::ConnectionFailed` if the connection cannot be
    /// established, or `StateError::MigrationFailed` if migrations fail.
    pub async fn open(db_path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StateError::ConnectionFailed(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                StateError::ConnectionFailed(format!(
                    "failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "state database opened");
        Ok(Self { pool })
    }

    /// Creates an in-memory pool for testing
    ///
    /// Uses a single connection so data persists across queries (SQLite
    /// in-memory databases are per-connection).
    pub async fn in_memory() -> Result<Self, StateError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StateError::ConnectionFailed(format!("failed to create in-memory database: {e}"))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("in-memory state database initialized");
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending migrations, each in its own transaction
    ///
    /// The schema version lives in `PRAGMA user_version`. Migrations are
    /// forward-only: a database newer than this binary is rejected.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StateError> {
        let row = sqlx::query("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(|e| StateError::MigrationFailed(format!("failed to read user_version: {e}")))?;
        let current: i64 = row.get(0);
        let target = MIGRATIONS.len() as i64;

        if current > target {
            return Err(StateError::MigrationFailed(format!(
                "database schema version {current} is newer than supported version {target}"
            )));
        }

        for (idx, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = idx as i64 + 1;
            let mut tx = pool.begin().await.map_err(|e| {
                StateError::MigrationFailed(format!("failed to begin migration {version}: {e}"))
            })?;

            sqlx::raw_sql(migration).execute(&mut *tx).await.map_err(|e| {
                StateError::MigrationFailed(format!("migration {version} failed: {e}"))
            })?;

            sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    StateError::MigrationFailed(format!(
                        "failed to set user_version {version}: {e}"
                    ))
                })?;

            tx.commit().await.map_err(|e| {
                StateError::MigrationFailed(format!("failed to commit migration {version}: {e}"))
            })?;

            tracing::debug!(version, "applied schema migration");
        }

        Ok(())
    }

    /// Forces a WAL checkpoint so all committed state is in the main file
    pub async fn checkpoint(&self) -> Result<(), StateError> {
        sqlx::raw_sql("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
