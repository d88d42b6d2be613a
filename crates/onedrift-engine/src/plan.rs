//! The action planner
//!
//! Turns classifier labels into an ordered [`ActionPlan`] of nine
//! phases, executed strictly in order:
//!
//! 1. folder creates (parent before child)
//! 2. moves
//! 3. downloads (parallel)
//! 4. uploads (parallel)
//! 5. local deletes (children before parents)
//! 6. remote deletes (children before parents)
//! 7. conflicts (copies + records)
//! 8. synced updates (no I/O)
//! 9. cleanups (no I/O)
//!
//! Safety gates live here: the big-delete tripwire refuses destructive
//! plans without `--force`, and actions whose parent folder is neither
//! in the baseline nor created earlier in the same plan are dropped
//! with a non-fatal error outcome rather than executed blind.

use std::collections::HashSet;

use onedrift_core::domain::{ConflictKind, ContentHash, ItemId, Resolution, ResolutionSource};
use tracing::{debug, warn};

use crate::classify::{Classified, DirLabel, FileLabel, Label};
use crate::report::{ActionKind, Outcome};
use crate::EngineError;

// ============================================================================
// Actions
// ============================================================================

/// One planned unit of work
#[derive(Debug, Clone)]
pub enum PlannedAction {
    /// Create a folder on the remote (local-only folder)
    CreateRemoteFolder { path: String },
    /// Create a folder locally (remote-only folder)
    CreateLocalFolder { path: String },
    /// Rename/move the remote item to follow a local rename
    RemoteMove {
        item_id: ItemId,
        from_path: String,
        to_path: String,
    },
    /// Rename/move the local file to follow a remote move
    LocalMove { from_path: String, to_path: String },
    /// Download remote content over the local path
    Download {
        item_id: ItemId,
        path: String,
        size: u64,
        remote_hash: Option<ContentHash>,
        mtime: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Upload local content, replacing `item_id` when it exists remotely
    Upload {
        path: String,
        size: u64,
        item_id: Option<ItemId>,
    },
    /// Remove the local file or folder
    DeleteLocal {
        path: String,
        is_dir: bool,
        item_id: Option<ItemId>,
    },
    /// Remove the remote item
    DeleteRemote { item_id: ItemId, path: String },
    /// Record a conflict: preserve local bytes, optionally bring the
    /// remote version down, and write the durable record
    RecordConflict {
        path: String,
        kind: ConflictKind,
        /// Remote item to download over the path after preserving
        download: Option<ItemId>,
        /// Pre-decided resolution (policy conflicts resolve themselves)
        auto_resolution: Option<(Resolution, ResolutionSource, String)>,
        local_hash: Option<ContentHash>,
        remote_hash: Option<ContentHash>,
    },
    /// Both sides converged: record the new baseline hash, no I/O
    SyncedUpdate {
        path: String,
        item_id: ItemId,
        hash: Option<ContentHash>,
    },
    /// Remove a baseline row that references nothing anymore
    CleanupBaseline { item_id: ItemId, path: String },
}

impl PlannedAction {
    /// The path this action operates on
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            PlannedAction::CreateRemoteFolder { path }
            | PlannedAction::CreateLocalFolder { path }
            | PlannedAction::Download { path, .. }
            | PlannedAction::Upload { path, .. }
            | PlannedAction::DeleteLocal { path, .. }
            | PlannedAction::DeleteRemote { path, .. }
            | PlannedAction::RecordConflict { path, .. }
            | PlannedAction::SyncedUpdate { path, .. }
            | PlannedAction::CleanupBaseline { path, .. } => path,
            PlannedAction::RemoteMove { to_path, .. } => to_path,
            PlannedAction::LocalMove { to_path, .. } => to_path,
        }
    }

    /// The outcome kind this action maps to
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            PlannedAction::CreateRemoteFolder { .. } => ActionKind::CreateFolderRemote,
            PlannedAction::CreateLocalFolder { .. } => ActionKind::CreateFolderLocal,
            PlannedAction::LocalMove { .. } => ActionKind::LocalMove,
            PlannedAction::RemoteMove { .. } => ActionKind::RemoteMove,
            PlannedAction::Download { .. } => ActionKind::Download,
            PlannedAction::Upload { .. } => ActionKind::Upload,
            PlannedAction::DeleteLocal { .. } => ActionKind::DeleteLocal,
            PlannedAction::DeleteRemote { .. } => ActionKind::DeleteRemote,
            PlannedAction::RecordConflict { .. } => ActionKind::Conflict,
            PlannedAction::SyncedUpdate { .. } => ActionKind::SyncedUpdate,
            PlannedAction::CleanupBaseline { .. } => ActionKind::Cleanup,
        }
    }
}

/// The ordered plan, one list per phase
#[derive(Debug, Default)]
pub struct ActionPlan {
    pub folder_creates: Vec<PlannedAction>,
    pub moves: Vec<PlannedAction>,
    pub downloads: Vec<PlannedAction>,
    pub uploads: Vec<PlannedAction>,
    pub local_deletes: Vec<PlannedAction>,
    pub remote_deletes: Vec<PlannedAction>,
    pub conflicts: Vec<PlannedAction>,
    pub synced_updates: Vec<PlannedAction>,
    pub cleanups: Vec<PlannedAction>,
}

impl ActionPlan {
    /// Total number of planned actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.folder_creates.len()
            + self.moves.len()
            + self.downloads.len()
            + self.uploads.len()
            + self.local_deletes.len()
            + self.remote_deletes.len()
            + self.conflicts.len()
            + self.synced_updates.len()
            + self.cleanups.len()
    }

    /// Returns true when nothing is planned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A non-fatal planning decision worth surfacing (e.g. a dropped action)
#[derive(Debug, Clone)]
pub struct PlanNote {
    pub path: String,
    pub message: String,
}

// ============================================================================
// Modes
// ============================================================================

/// Direction restriction for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Bidirectional,
    /// Suppress remote-change-derived actions (downloads, local deletes)
    UploadOnly,
    /// Suppress upload-derived actions (uploads, remote deletes, moves out)
    DownloadOnly,
}

impl SyncMode {
    /// The spelling used in reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Bidirectional => "bidirectional",
            SyncMode::UploadOnly => "upload-only",
            SyncMode::DownloadOnly => "download-only",
        }
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Planner configuration (safety thresholds + mode)
#[derive(Debug, Clone)]
pub struct Planner {
    pub big_delete_min_items: usize,
    pub big_delete_percentage: u32,
    pub mode: SyncMode,
    pub force: bool,
}

impl Planner {
    /// Build the ordered plan for one cycle
    ///
    /// `moves` are the pre-detected move actions (the engine matches
    /// item identity before classification). `baseline_count` feeds the
    /// big-delete gate denominator. `known_folders` are baseline folder
    /// paths that already exist on both sides.
    ///
    /// Besides the plan itself, returns mode-gate notes and one failed
    /// [`Outcome`] per action the unknown-parent gate dropped; the
    /// caller folds those into the cycle's outcomes so the drop is
    /// visible to the operator.
    pub fn plan(
        &self,
        classified: &[Classified],
        moves: Vec<PlannedAction>,
        known_folders: &HashSet<String>,
        baseline_count: u64,
    ) -> Result<(ActionPlan, Vec<PlanNote>, Vec<Outcome>), EngineError> {
        let mut plan = ActionPlan::default();
        let mut notes = Vec::new();
        let mut dropped = Vec::new();

        plan.moves = self.filter_moves(moves, &mut notes);

        for item in classified {
            self.plan_one(item, &mut plan, &mut notes);
        }

        // Phase 1 order: parents before children.
        plan.folder_creates
            .sort_by_key(|a| (depth_of(a.path()), a.path().to_string()));
        // Phases 5/6 order: children before parents.
        plan.local_deletes
            .sort_by_key(|a| std::cmp::Reverse(depth_of(a.path())));
        plan.remote_deletes
            .sort_by_key(|a| std::cmp::Reverse(depth_of(a.path())));

        self.check_big_delete(&plan, baseline_count)?;
        self.check_parents(&mut plan, known_folders, &mut dropped);

        debug!(
            actions = plan.len(),
            notes = notes.len(),
            dropped = dropped.len(),
            mode = self.mode.as_str(),
            "plan ready"
        );
        Ok((plan, notes, dropped))
    }

    fn filter_moves(
        &self,
        moves: Vec<PlannedAction>,
        notes: &mut Vec<PlanNote>,
    ) -> Vec<PlannedAction> {
        moves
            .into_iter()
            .filter(|action| {
                let keep = match (action, self.mode) {
                    (PlannedAction::LocalMove { .. }, SyncMode::UploadOnly) => false,
                    (PlannedAction::RemoteMove { .. }, SyncMode::DownloadOnly) => false,
                    _ => true,
                };
                if !keep {
                    notes.push(PlanNote {
                        path: action.path().to_string(),
                        message: format!("move suppressed in {} mode", self.mode.as_str()),
                    });
                }
                keep
            })
            .collect()
    }

    fn plan_one(&self, item: &Classified, plan: &mut ActionPlan, notes: &mut Vec<PlanNote>) {
        let view = &item.view;
        let path = view.path.clone();
        let remote_id = view.remote.as_ref().map(|r| r.item_id.clone());
        let remote_hash = view.remote.as_ref().and_then(|r| r.hash.clone());
        let remote_size = view.remote.as_ref().map(|r| r.size).unwrap_or(0);
        let remote_mtime = view.remote.as_ref().and_then(|r| r.mtime);
        let local_size = view.local.as_ref().map(|l| l.size).unwrap_or(0);
        let row_id = view.item.as_ref().map(|i| i.item_id.clone());

        match item.label {
            // ---- files -----------------------------------------------------
            Label::File(FileLabel::Unchanged) => {}
            Label::File(FileLabel::RemoteEdit) | Label::File(FileLabel::NewRemote) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "download", self.mode);
                    return;
                }
                let Some(item_id) = remote_id else { return };
                plan.downloads.push(PlannedAction::Download {
                    item_id,
                    path,
                    size: remote_size,
                    remote_hash,
                    mtime: remote_mtime,
                });
            }
            Label::File(FileLabel::LocalEdit) | Label::File(FileLabel::NewLocal) => {
                if self.mode == SyncMode::DownloadOnly {
                    note_suppressed(notes, &path, "upload", self.mode);
                    return;
                }
                plan.uploads.push(PlannedAction::Upload {
                    path,
                    size: local_size,
                    item_id: remote_id,
                });
            }
            Label::File(FileLabel::PreservedLocalEdit) => {
                // Remote deleted the file but the local copy has edits:
                // re-upload, and leave an auto-resolved record behind so
                // the history shows why the file came back.
                if self.mode == SyncMode::DownloadOnly {
                    note_suppressed(notes, &path, "upload", self.mode);
                    return;
                }
                plan.uploads.push(PlannedAction::Upload {
                    path: path.clone(),
                    size: local_size,
                    item_id: None,
                });
                plan.conflicts.push(PlannedAction::RecordConflict {
                    path,
                    kind: ConflictKind::EditDelete,
                    download: None,
                    auto_resolution: Some((
                        Resolution::KeepLocal,
                        ResolutionSource::Auto,
                        "remote deleted, local edit preserved and re-uploaded".to_string(),
                    )),
                    local_hash: item.local_hash.clone(),
                    remote_hash: None,
                });
            }
            Label::File(FileLabel::ConvergentEdit)
            | Label::File(FileLabel::ConvergentCreate) => {
                let Some(item_id) = remote_id else { return };
                plan.synced_updates.push(PlannedAction::SyncedUpdate {
                    path,
                    item_id,
                    hash: remote_hash,
                });
            }
            Label::File(FileLabel::RemoteDelete) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "local delete", self.mode);
                    return;
                }
                plan.local_deletes.push(PlannedAction::DeleteLocal {
                    path,
                    is_dir: false,
                    item_id: row_id,
                });
            }
            Label::File(FileLabel::LocalDelete) => {
                if self.mode == SyncMode::DownloadOnly {
                    note_suppressed(notes, &path, "remote delete", self.mode);
                    return;
                }
                let Some(item_id) = remote_id else { return };
                plan.remote_deletes
                    .push(PlannedAction::DeleteRemote { item_id, path });
            }
            Label::File(FileLabel::EditEditConflict) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "conflict download", self.mode);
                    return;
                }
                plan.conflicts.push(PlannedAction::RecordConflict {
                    path,
                    kind: ConflictKind::EditEdit,
                    download: remote_id,
                    auto_resolution: None,
                    local_hash: item.local_hash.clone(),
                    remote_hash,
                });
            }
            Label::File(FileLabel::CreateCreateConflict) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "conflict download", self.mode);
                    return;
                }
                plan.conflicts.push(PlannedAction::RecordConflict {
                    path,
                    kind: ConflictKind::CreateCreate,
                    download: remote_id,
                    auto_resolution: None,
                    local_hash: item.local_hash.clone(),
                    remote_hash,
                });
            }
            Label::File(FileLabel::EditDeleteConflict) => {
                // Local deleted, remote edited: the remote edit is the
                // surviving user data, bring it back.
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "conflict download", self.mode);
                    return;
                }
                plan.conflicts.push(PlannedAction::RecordConflict {
                    path,
                    kind: ConflictKind::EditDelete,
                    download: remote_id,
                    auto_resolution: Some((
                        Resolution::KeepRemote,
                        ResolutionSource::Auto,
                        "local delete superseded by remote edit".to_string(),
                    )),
                    local_hash: None,
                    remote_hash,
                });
            }
            Label::File(FileLabel::BothDeleted) => {
                if let Some(row) = &view.item {
                    plan.cleanups.push(PlannedAction::CleanupBaseline {
                        item_id: row.item_id.clone(),
                        path,
                    });
                }
            }

            // ---- directories ----------------------------------------------
            Label::Dir(DirLabel::Unchanged) => {}
            Label::Dir(DirLabel::NewRemote) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "local folder create", self.mode);
                    return;
                }
                plan.folder_creates
                    .push(PlannedAction::CreateLocalFolder { path });
            }
            Label::Dir(DirLabel::NewLocal) | Label::Dir(DirLabel::RemoteDeleteWithSurvivors) => {
                if self.mode == SyncMode::DownloadOnly {
                    note_suppressed(notes, &path, "remote folder create", self.mode);
                    return;
                }
                plan.folder_creates
                    .push(PlannedAction::CreateRemoteFolder { path });
            }
            Label::Dir(DirLabel::RemoteDelete) => {
                if self.mode == SyncMode::UploadOnly {
                    note_suppressed(notes, &path, "local delete", self.mode);
                    return;
                }
                plan.local_deletes.push(PlannedAction::DeleteLocal {
                    path,
                    is_dir: true,
                    item_id: row_id,
                });
            }
            Label::Dir(DirLabel::LocalDelete) => {
                if self.mode == SyncMode::DownloadOnly {
                    note_suppressed(notes, &path, "remote delete", self.mode);
                    return;
                }
                let Some(item_id) = remote_id else { return };
                plan.remote_deletes
                    .push(PlannedAction::DeleteRemote { item_id, path });
            }
            Label::Dir(DirLabel::ConvergentCreate) => {
                let Some(item_id) = remote_id else { return };
                plan.synced_updates.push(PlannedAction::SyncedUpdate {
                    path,
                    item_id,
                    hash: None,
                });
            }
            Label::Dir(DirLabel::BothDeleted) => {
                if let Some(row) = &view.item {
                    plan.cleanups.push(PlannedAction::CleanupBaseline {
                        item_id: row.item_id.clone(),
                        path,
                    });
                }
            }
        }
    }

    /// The big-delete tripwire
    ///
    /// Trips when the planned deletes reach both the absolute minimum and
    /// the configured share of the baseline. `--force` overrides.
    fn check_big_delete(&self, plan: &ActionPlan, baseline_count: u64) -> Result<(), EngineError> {
        let planned = plan.local_deletes.len() + plan.remote_deletes.len();
        if planned < self.big_delete_min_items {
            return Ok(());
        }
        let share_reached =
            (planned as u64) * 100 >= u64::from(self.big_delete_percentage) * baseline_count;
        if !share_reached {
            return Ok(());
        }
        if self.force {
            warn!(planned, baseline_count, "big-delete gate overridden by force");
            return Ok(());
        }
        Err(EngineError::BigDelete {
            planned,
            baseline: baseline_count,
        })
    }

    /// Drop uploads/moves whose parent folder neither exists in the
    /// baseline nor is created earlier in this very plan.
    ///
    /// Each dropped action becomes a failed outcome (non-fatal): the
    /// cycle continues, but the drop lands in the report's error list
    /// and the action retries next cycle once the parent exists.
    fn check_parents(
        &self,
        plan: &mut ActionPlan,
        known_folders: &HashSet<String>,
        dropped: &mut Vec<Outcome>,
    ) {
        let created: HashSet<String> = plan
            .folder_creates
            .iter()
            .map(|a| a.path().to_string())
            .collect();

        let parent_known = |path: &str| -> bool {
            match path.rsplit_once('/') {
                None => true, // root-level
                Some((parent, _)) => known_folders.contains(parent) || created.contains(parent),
            }
        };

        let mut drop_unknown = |actions: &mut Vec<PlannedAction>, what: &str| {
            actions.retain(|action| {
                let target = match action {
                    PlannedAction::Upload { path, .. } => path.as_str(),
                    PlannedAction::RemoteMove { to_path, .. } => to_path.as_str(),
                    PlannedAction::CreateRemoteFolder { path } => path.as_str(),
                    _ => return true,
                };
                if parent_known(target) {
                    true
                } else {
                    warn!(path = target, "{what} dropped: parent folder unknown");
                    dropped.push(Outcome::failure(
                        action.kind(),
                        target,
                        format!("{what} dropped: parent folder unknown"),
                    ));
                    false
                }
            });
        };

        drop_unknown(&mut plan.folder_creates, "folder create");
        drop_unknown(&mut plan.uploads, "upload");
        drop_unknown(&mut plan.moves, "move");
    }
}

fn note_suppressed(notes: &mut Vec<PlanNote>, path: &str, what: &str, mode: SyncMode) {
    notes.push(PlanNote {
        path: path.to_string(),
        message: format!("{what} suppressed in {} mode", mode.as_str()),
    });
}

fn depth_of(path: &str) -> usize {
    path.matches('/').count()
}

// ============================================================================
// Tests
// ============================================================================
