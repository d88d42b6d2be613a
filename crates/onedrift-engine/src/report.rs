//! Outcomes and the cycle report
//!
//! The executor never touches the state store; it emits one [`Outcome`]
//! per attempted action and the orchestrator commits them afterwards.
//! [`SyncReport`] is the operator-facing summary, serializable to the
//! stable JSON schema the CLI prints with `--json`.

use onedrift_core::domain::{ConflictRecord, ContentHash, ItemId};
use onedrift_core::ports::RemoteItem;
use serde::Serialize;

// ============================================================================
// Outcomes
// ============================================================================

/// What kind of action an outcome describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CreateFolderRemote,
    CreateFolderLocal,
    LocalMove,
    RemoteMove,
    Download,
    Upload,
    DeleteLocal,
    DeleteRemote,
    Conflict,
    SyncedUpdate,
    Cleanup,
}

/// Result of one executed action
#[derive(Debug, Clone)]
pub struct Outcome {
    pub kind: ActionKind,
    pub path: String,
    pub success: bool,
    pub error: Option<String>,
    /// Bytes actually transferred (downloads/uploads)
    pub bytes: u64,
    /// The remote item the action produced or observed, when any
    pub remote_item: Option<RemoteItem>,
    /// Baseline item the action targeted, when known
    pub item_id: Option<ItemId>,
    /// Content hash the path converged to, when known
    pub hash: Option<ContentHash>,
    /// Durable conflict record to persist, when the action produced one
    pub conflict: Option<ConflictRecord>,
    /// For moves: the path the item previously occupied
    pub previous_path: Option<String>,
    /// Whether transferred content was verified against a remote hash
    pub hash_verified: bool,
}

impl Outcome {
    /// A successful outcome skeleton
    #[must_use]
    pub fn success(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            success: true,
            error: None,
            bytes: 0,
            remote_item: None,
            item_id: None,
            hash: None,
            conflict: None,
            previous_path: None,
            hash_verified: true,
        }
    }

    /// A failed outcome skeleton
    #[must_use]
    pub fn failure(kind: ActionKind, path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            success: false,
            error: Some(error.into()),
            bytes: 0,
            remote_item: None,
            item_id: None,
            hash: None,
            conflict: None,
            previous_path: None,
            hash_verified: false,
        }
    }
}

// ============================================================================
// SyncReport
// ============================================================================

/// One failed action in the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub path: String,
    pub error: String,
}

/// Operator-facing summary of a sync cycle (stable JSON schema)
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: String,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub folders_created: u64,
    pub downloaded: u64,
    pub bytes_downloaded: u64,
    pub uploaded: u64,
    pub bytes_uploaded: u64,
    pub local_deleted: u64,
    pub remote_deleted: u64,
    pub moved: u64,
    pub conflicts: u64,
    pub synced_updates: u64,
    pub errors: Vec<ReportError>,
}

impl SyncReport {
    /// Build a report from executed outcomes
    #[must_use]
    pub fn from_outcomes(
        mode: &str,
        dry_run: bool,
        duration_ms: u64,
        outcomes: &[Outcome],
    ) -> Self {
        let mut report = Self {
            mode: mode.to_string(),
            dry_run,
            duration_ms,
            folders_created: 0,
            downloaded: 0,
            bytes_downloaded: 0,
            uploaded: 0,
            bytes_uploaded: 0,
            local_deleted: 0,
            remote_deleted: 0,
            moved: 0,
            conflicts: 0,
            synced_updates: 0,
            errors: Vec::new(),
        };

        for outcome in outcomes {
            if !outcome.success {
                report.errors.push(ReportError {
                    path: outcome.path.clone(),
                    error: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                });
                continue;
            }
            match outcome.kind {
                ActionKind::CreateFolderRemote | ActionKind::CreateFolderLocal => {
                    report.folders_created += 1;
                }
                ActionKind::Download => {
                    report.downloaded += 1;
                    report.bytes_downloaded += outcome.bytes;
                }
                ActionKind::Upload => {
                    report.uploaded += 1;
                    report.bytes_uploaded += outcome.bytes;
                }
                ActionKind::DeleteLocal => report.local_deleted += 1,
                ActionKind::DeleteRemote => report.remote_deleted += 1,
                ActionKind::LocalMove | ActionKind::RemoteMove => report.moved += 1,
                ActionKind::Conflict => report.conflicts += 1,
                ActionKind::SyncedUpdate => report.synced_updates += 1,
                ActionKind::Cleanup => {}
            }
        }

        report
    }

    /// Returns true when the cycle moved or changed nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.folders_created == 0
            && self.downloaded == 0
            && self.uploaded == 0
            && self.local_deleted == 0
            && self.remote_deleted == 0
            && self.moved == 0
            && self.conflicts == 0
            && self.errors.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
