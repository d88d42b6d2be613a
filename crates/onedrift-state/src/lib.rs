//! onedrift State - Persistent baseline storage
//!
//! SQLite-backed store for:
//! - Baseline items (what each side last looked like)
//! - Delta cursors
//! - Conflict records with decision history
//! - Upload session records
//! - Stale-file records and configuration snapshots
//!
//! The store is single-logical-writer: all mutations go through one
//! [`StateStore`]. Readers may run concurrently and observe committed
//! state (WAL journal mode). Multi-row operations run in one transaction.

use thiserror::Error;

pub mod pool;
pub mod sessions;
pub mod store;

pub use pool::StatePool;
pub use sessions::DiskSessionStore;
pub use store::StateStore;

/// Errors produced by the state store
#[derive(Debug, Error)]
pub enum StateError {
    /// Could not open or create the database
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into a domain type
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The persisted state is internally inconsistent (e.g. a parent
    /// cycle); fatal for the cycle
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// Underlying database error
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}
