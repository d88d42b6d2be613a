//! onedrift Engine - the synchronization core
//!
//! One sync cycle runs through five stages:
//!
//! 1. **Ingest** ([`ingest`]) - pull remote delta pages into the state
//!    store, persisting the cursor only at page boundaries
//! 2. **Scan** - observe the local tree (via `onedrift-scan`)
//! 3. **Classify** ([`classify`]) - join baseline, remote, and local per
//!    path and assign one edit label
//! 4. **Plan** ([`plan`]) - order labels into nine phases, enforcing the
//!    big-delete and unknown-parent safety gates
//! 5. **Execute** ([`execute`]) - run the phases with bounded
//!    parallelism, retries, and resumable transfers ([`transfer`]),
//!    then commit outcomes as the new baseline
//!
//! The engine never talks to the wire directly: all remote access goes
//! through the `RemoteClient` port.

use thiserror::Error;

pub mod classify;
pub mod engine;
pub mod execute;
pub mod ingest;
pub mod plan;
pub mod report;
pub mod transfer;
pub mod view;

pub use engine::{CycleOptions, SyncEngine, SyncMode, VerifyReport};
pub use report::SyncReport;

use onedrift_core::ports::RemoteError;
use onedrift_state::StateError;

/// Errors that abort a sync cycle
#[derive(Debug, Error)]
pub enum EngineError {
    /// State store failure
    #[error(transparent)]
    State(#[from] StateError),

    /// Fatal remote failure (auth expired, quota exceeded)
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The big-delete safety gate tripped
    #[error(
        "big-delete protection: plan would delete {planned} of {baseline} baseline items; \
         re-run with --force to proceed"
    )]
    BigDelete { planned: usize, baseline: u64 },

    /// Local filesystem failure outside a single item's scope
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cycle was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
