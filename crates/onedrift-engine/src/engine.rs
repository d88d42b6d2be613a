//! The per-drive sync orchestrator
//!
//! [`SyncEngine::run_cycle`] drives one complete reconciliation:
//! ingest, scan, move detection, classification, planning, execution,
//! and the transactional baseline commit. One engine runs one cycle at
//! a time for its drive; multiple drives run as independent engines.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use onedrift_core::config::Config;
use onedrift_core::domain::{ContentHash, DriveId, Item, ItemType, StaleRecord};
use onedrift_core::ports::RemoteClient;
use onedrift_scan::{hash_file, LocalEntry, LocalScanner, SkipFilter};
use onedrift_state::{DiskSessionStore, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify_all, LocalHashProvider};
use crate::execute::Executor;
use crate::ingest::{DeltaIngester, RemoteMoveHint};
use crate::plan::{ActionPlan, PlannedAction, Planner};
use crate::report::{ActionKind, Outcome, SyncReport};
use crate::transfer::TransferManager;
use crate::EngineError;

pub use crate::plan::SyncMode;

/// Config-snapshot key for the active filter fingerprint
const FILTER_SNAPSHOT_KEY: &str = "filter_fingerprint";

// ============================================================================
// Options and reports
// ============================================================================

/// Per-cycle options from the CLI surface
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    pub mode: SyncMode,
    pub dry_run: bool,
    pub force: bool,
}

/// Result of a `verify` pass over the converged baseline
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: u64,
    /// Paths whose local content no longer matches the converged hash
    pub mismatched: Vec<String>,
    /// Paths in the converged baseline with no local file
    pub missing: Vec<String>,
}

impl VerifyReport {
    /// Returns true when every file verified
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

// ============================================================================
// Lazy hash provider
// ============================================================================

/// Hashes files under the sync root on demand, memoizing per cycle
struct RootHasher {
    root: PathBuf,
    cache: tokio::sync::Mutex<HashMap<String, ContentHash>>,
}

#[async_trait::async_trait]
impl LocalHashProvider for RootHasher {
    async fn hash(&self, rel_path: &str) -> anyhow::Result<ContentHash> {
        if let Some(hash) = self.cache.lock().await.get(rel_path) {
            return Ok(hash.clone());
        }
        let hash = hash_file(&self.root.join(rel_path)).await?;
        self.cache
            .lock()
            .await
            .insert(rel_path.to_string(), hash.clone());
        Ok(hash)
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// One drive's synchronization engine
pub struct SyncEngine {
    drive_id: DriveId,
    remote: Arc<dyn RemoteClient>,
    store: Arc<StateStore>,
    sessions: Arc<DiskSessionStore>,
    root: PathBuf,
    config: Config,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        drive_id: DriveId,
        remote: Arc<dyn RemoteClient>,
        store: Arc<StateStore>,
        sessions: Arc<DiskSessionStore>,
        root: impl Into<PathBuf>,
        config: Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            drive_id,
            remote,
            store,
            sessions,
            root: root.into(),
            config,
            cancel,
        }
    }

    /// The cancellation token observed by every phase
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one full sync cycle
    pub async fn run_cycle(&self, opts: &CycleOptions) -> Result<SyncReport, EngineError> {
        let started = Instant::now();
        info!(
            drive = %self.drive_id,
            mode = opts.mode.as_str(),
            dry_run = opts.dry_run,
            "sync cycle starting"
        );

        // Stage 1: pull remote changes into the baseline.
        let ingester = DeltaIngester::new(
            self.remote.clone(),
            self.store.clone(),
            self.cancel.clone(),
        );
        let ingest = ingester.ingest(&self.drive_id).await?;

        // Stage 2: observe the local tree.
        let filter = SkipFilter::new(&self.config.filters)
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
        let filter_fingerprint = filter.fingerprint();
        let scanner = LocalScanner::new(self.root.clone(), filter);
        let scan = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("scan task failed: {e}")))?;
        for warning in &scan.warnings {
            warn!(drive = %self.drive_id, "{warning}");
        }

        // Stage 3: load baseline rows and set aside filtered-out paths.
        let mut rows = self.store.list_items_with_tombstones(&self.drive_id).await?;
        let filter = SkipFilter::new(&self.config.filters)
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
        rows = self.set_aside_stale_rows(rows, &filter).await?;
        self.store
            .set_config_value(FILTER_SNAPSHOT_KEY, &filter_fingerprint)
            .await?;

        // Stage 4: move detection before classification.
        let mut local_entries = scan.entries;
        let mut moves = Vec::new();
        self.detect_remote_moves(&ingest.move_hints, &rows, &mut local_entries, &mut moves);
        self.detect_local_renames(&rows, &mut local_entries, &mut moves)
            .await?;

        // Stage 5: classify.
        let views = crate::view::build_views(&rows, &local_entries);
        let hasher = RootHasher {
            root: self.root.clone(),
            cache: tokio::sync::Mutex::new(HashMap::new()),
        };
        let classified = classify_all(views, &hasher).await?;

        // Stage 6: plan, with the safety gates.
        let known_folders: HashSet<String> = rows
            .iter()
            .filter(|r| r.item_type == ItemType::Folder && !r.is_deleted && !r.path.is_empty())
            .map(|r| r.path.clone())
            .collect();
        let baseline_count = self.store.count_active_items(&self.drive_id).await?;
        let planner = Planner {
            big_delete_min_items: self.config.safety.big_delete_min_items,
            big_delete_percentage: self.config.safety.big_delete_percentage,
            mode: opts.mode,
            force: opts.force,
        };
        let (plan, notes, dropped) =
            planner.plan(&classified, moves, &known_folders, baseline_count)?;
        for note in &notes {
            warn!(path = %note.path, "{}", note.message);
        }

        // Dry run stops here: the plan is reported, nothing executes.
        // Gate-dropped actions still surface as errors.
        if opts.dry_run {
            let report = report_from_plan(
                opts,
                &plan,
                &dropped,
                started.elapsed().as_millis() as u64,
            );
            info!(drive = %self.drive_id, "dry run complete");
            return Ok(report);
        }

        // Stage 7: execute.
        let transfers = Arc::new(TransferManager::new(
            self.remote.clone(),
            self.sessions.clone(),
            self.config.transfers.clone(),
            self.cancel.clone(),
        ));
        let executor = Arc::new(Executor::new(
            self.drive_id.clone(),
            self.remote.clone(),
            self.store.clone(),
            transfers,
            self.root.clone(),
            self.cancel.clone(),
            self.config.transfers.download_workers,
            self.config.transfers.upload_workers,
        ));
        let mut outcomes = executor.execute(plan).await;
        // Actions the unknown-parent gate dropped never reached the
        // executor; their failed outcomes join the rest so the report
        // (and the exit code) reflect them.
        outcomes.extend(dropped);

        // Stage 8: commit outcomes (with the terminal delta cursor) as
        // the new baseline. Partial outcomes from a cancelled cycle are
        // committed too; completed work is never forgotten.
        self.commit_outcomes(&outcomes, ingest.terminal.as_ref())
            .await?;

        // Stage 9: housekeeping. The sweeper runs in the background and
        // throttles itself; a panic inside it costs only the sweep.
        self.store
            .cleanup_tombstones(self.config.sync.tombstone_retention_days)
            .await?;
        let sessions = self.sessions.clone();
        let stale_age = self.config.transfers.stale_session_age_days;
        let sweeper = tokio::task::spawn_blocking(move || sessions.sweep_stale(stale_age));
        tokio::spawn(async move {
            match sweeper.await {
                Ok(Some(swept)) if swept > 0 => debug!(swept, "swept stale upload sessions"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "session sweeper panicked"),
            }
        });
        self.store.checkpoint().await?;

        let report = SyncReport::from_outcomes(
            opts.mode.as_str(),
            false,
            started.elapsed().as_millis() as u64,
            &outcomes,
        );
        info!(
            drive = %self.drive_id,
            duration_ms = report.duration_ms,
            errors = report.errors.len(),
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Re-hash every converged file and compare with the baseline
    pub async fn verify(&self) -> Result<VerifyReport, EngineError> {
        let mut report = VerifyReport::default();

        for item in self.store.list_synced_items(&self.drive_id).await? {
            if item.item_type != ItemType::File || item.path.is_empty() {
                continue;
            }
            let Some(synced_hash) = &item.synced_hash else {
                continue;
            };
            report.checked += 1;

            let local = self.root.join(&item.path);
            match hash_file(&local).await {
                Ok(hash) if &hash == synced_hash => {}
                Ok(_) => report.mismatched.push(item.path.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.missing.push(item.path.clone());
                }
                Err(e) => {
                    warn!(path = %item.path, error = %e, "verify could not read file");
                    report.mismatched.push(item.path.clone());
                }
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Stale rows
    // ------------------------------------------------------------------

    /// Remove rows the current filter set excludes, recording them as
    /// stale instead of letting them classify as local deletions.
    async fn set_aside_stale_rows(
        &self,
        rows: Vec<Item>,
        filter: &SkipFilter,
    ) -> Result<Vec<Item>, EngineError> {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if row.is_deleted || row.path.is_empty() || row.item_type == ItemType::Root {
                kept.push(row);
                continue;
            }
            let is_dir = row.item_type.is_container();
            match filter.excludes_path(&row.path, is_dir, row.size) {
                None => kept.push(row),
                Some(reason) => {
                    debug!(path = %row.path, reason, "baseline row excluded by filters");
                    self.store
                        .save_stale_file(&StaleRecord::new(
                            self.drive_id.clone(),
                            row.item_id.clone(),
                            row.path.clone(),
                            reason,
                        ))
                        .await?;
                }
            }
        }
        Ok(kept)
    }

    // ------------------------------------------------------------------
    // Move detection
    // ------------------------------------------------------------------

    /// Remote-side moves: the ingester saw an item keep its key while
    /// changing parent or name. If the local disk still has the old
    /// path, plan a local rename instead of delete + download.
    fn detect_remote_moves(
        &self,
        hints: &[RemoteMoveHint],
        rows: &[Item],
        local_entries: &mut Vec<LocalEntry>,
        moves: &mut Vec<PlannedAction>,
    ) {
        let rows_by_id: HashMap<&str, &Item> = rows
            .iter()
            .map(|r| (r.item_id.as_str(), r))
            .collect();

        for hint in hints {
            let Some(row) = rows_by_id.get(hint.item_id.as_str()) else {
                continue;
            };
            if row.is_deleted || row.path.is_empty() || row.path == hint.old_path {
                continue;
            }
            let new_path = row.path.clone();

            let old_exists = local_entries.iter().any(|e| e.rel_path == hint.old_path);
            let new_exists = local_entries.iter().any(|e| e.rel_path == new_path);
            if !old_exists || new_exists {
                continue;
            }

            debug!(from = %hint.old_path, to = %new_path, "remote move follows locally");
            moves.push(PlannedAction::LocalMove {
                from_path: hint.old_path.clone(),
                to_path: new_path.clone(),
            });

            // Classification sees the post-move world: the entry (and,
            // for folders, its subtree) re-keys to the new path.
            let old_prefix = format!("{}/", hint.old_path);
            for entry in local_entries.iter_mut() {
                if entry.rel_path == hint.old_path {
                    entry.rel_path = new_path.clone();
                } else if let Some(rest) = entry.rel_path.strip_prefix(&old_prefix) {
                    entry.rel_path = format!("{new_path}/{rest}");
                }
            }
        }
    }

    /// Local renames: a new local file whose `(size, quickXorHash)`
    /// matches a converged row that lost its local file. Planned as a
    /// remote move rather than delete + upload.
    async fn detect_local_renames(
        &self,
        rows: &[Item],
        local_entries: &mut Vec<LocalEntry>,
        moves: &mut Vec<PlannedAction>,
    ) -> Result<(), EngineError> {
        let row_paths: HashSet<&str> = rows
            .iter()
            .filter(|r| !r.is_deleted && !r.path.is_empty())
            .map(|r| r.path.as_str())
            .collect();
        let local_paths: HashSet<String> =
            local_entries.iter().map(|e| e.rel_path.clone()).collect();

        // Converged file rows whose local file vanished.
        let orphaned_rows: Vec<&Item> = rows
            .iter()
            .filter(|r| {
                r.item_type == ItemType::File
                    && !r.is_deleted
                    && !r.path.is_empty()
                    && r.synced_hash.is_some()
                    && !local_paths.contains(&r.path)
            })
            .collect();
        if orphaned_rows.is_empty() {
            return Ok(());
        }

        let mut claimed_rows: HashSet<&str> = HashSet::new();
        let mut patches: Vec<(String, String, u64, Option<chrono::DateTime<Utc>>)> = Vec::new();

        for entry in local_entries.iter() {
            if entry.kind != onedrift_scan::LocalEntryKind::File
                || row_paths.contains(entry.rel_path.as_str())
            {
                continue;
            }
            // Cheap size pre-filter before hashing the candidate.
            let candidates: Vec<&&Item> = orphaned_rows
                .iter()
                .filter(|r| r.size == entry.size && !claimed_rows.contains(r.path.as_str()))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let local_hash = match hash_file(&self.root.join(&entry.rel_path)).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(path = %entry.rel_path, error = %e, "rename probe could not hash file");
                    continue;
                }
            };

            if let Some(row) = candidates
                .into_iter()
                .find(|r| r.synced_hash.as_ref() == Some(&local_hash))
            {
                debug!(from = %row.path, to = %entry.rel_path, "local rename detected");
                claimed_rows.insert(row.path.as_str());
                moves.push(PlannedAction::RemoteMove {
                    item_id: row.item_id.clone(),
                    from_path: row.path.clone(),
                    to_path: entry.rel_path.clone(),
                });
                patches.push((
                    entry.rel_path.clone(),
                    row.path.clone(),
                    row.size,
                    row.updated_at,
                ));
            }
        }

        // Re-key the matched entries back to their old paths so the
        // classifier sees them as unchanged (the move handles the rest).
        for (new_path, old_path, size, mtime) in patches {
            local_entries.retain(|e| e.rel_path != new_path);
            local_entries.push(LocalEntry {
                rel_path: old_path,
                kind: onedrift_scan::LocalEntryKind::File,
                size,
                mtime,
            });
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Baseline commit
    // ------------------------------------------------------------------

    /// Fold outcomes into the baseline, in one transaction together
    /// with the delta cursor they depend on.
    async fn commit_outcomes(
        &self,
        outcomes: &[Outcome],
        terminal: Option<&onedrift_core::domain::DeltaCursor>,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut upserts: Vec<Item> = Vec::new();
        let mut tombstones: Vec<(onedrift_core::domain::ItemId, chrono::DateTime<Utc>)> =
            Vec::new();
        let mut purges: Vec<onedrift_core::domain::ItemId> = Vec::new();
        let mut clear_synced: Vec<onedrift_core::domain::ItemId> = Vec::new();
        let mut cascades: Vec<(String, String)> = Vec::new();

        for outcome in outcomes {
            if !outcome.success {
                continue;
            }
            match outcome.kind {
                ActionKind::CreateFolderRemote | ActionKind::Upload | ActionKind::RemoteMove => {
                    let Some(remote_item) = &outcome.remote_item else {
                        continue;
                    };
                    let existing = self
                        .store
                        .get_item(&self.drive_id, &remote_item.id)
                        .await?;
                    let mut row = crate::ingest::remote_item_to_row(
                        &self.drive_id,
                        remote_item.clone(),
                        existing,
                    );
                    row.synced_at = Some(now);
                    if outcome.kind == ActionKind::Upload {
                        row.synced_hash = outcome.hash.clone();
                    }
                    upserts.push(row);

                    if outcome.kind == ActionKind::RemoteMove {
                        if let Some(previous) = &outcome.previous_path {
                            cascades.push((previous.clone(), outcome.path.clone()));
                        }
                    }
                }
                ActionKind::CreateFolderLocal | ActionKind::LocalMove => {
                    if let Some(mut row) = self
                        .store
                        .get_item_by_path(&self.drive_id, &outcome.path)
                        .await?
                    {
                        row.synced_at = Some(now);
                        upserts.push(row);
                    }
                }
                ActionKind::Download | ActionKind::SyncedUpdate => {
                    let Some(item_id) = &outcome.item_id else {
                        continue;
                    };
                    if let Some(mut row) = self.store.get_item(&self.drive_id, item_id).await? {
                        if row.item_type == ItemType::File {
                            row.synced_hash = outcome.hash.clone();
                        }
                        row.synced_at = Some(now);
                        upserts.push(row);
                    }
                }
                ActionKind::DeleteLocal => {
                    if let Some(item_id) = &outcome.item_id {
                        clear_synced.push(item_id.clone());
                    }
                }
                ActionKind::DeleteRemote => {
                    if let Some(item_id) = &outcome.item_id {
                        tombstones.push((item_id.clone(), now));
                        clear_synced.push(item_id.clone());
                    }
                }
                ActionKind::Conflict => {
                    if let Some(record) = &outcome.conflict {
                        self.store.save_conflict(record).await?;
                    }
                    if let (Some(item_id), Some(hash)) = (&outcome.item_id, &outcome.hash) {
                        if let Some(mut row) =
                            self.store.get_item(&self.drive_id, item_id).await?
                        {
                            row.synced_hash = Some(hash.clone());
                            row.synced_at = Some(now);
                            upserts.push(row);
                        }
                    }
                }
                ActionKind::Cleanup => {
                    if let Some(item_id) = &outcome.item_id {
                        purges.push(item_id.clone());
                    }
                }
            }
        }

        self.store
            .commit_cycle(&self.drive_id, &upserts, &tombstones, &purges, terminal)
            .await?;

        for item_id in clear_synced {
            self.store
                .clear_synced_markers(&self.drive_id, &item_id)
                .await?;
        }
        for (old_prefix, new_prefix) in cascades {
            self.store
                .cascade_path_update(&self.drive_id, &old_prefix, &new_prefix)
                .await?;
        }

        Ok(())
    }
}

// ============================================================================
// Dry-run reporting
// ============================================================================

/// Build the report for a plan that will not execute
///
/// `dropped` carries the failed outcomes of gate-dropped actions; a dry
/// run reports them the same way a real run would.
fn report_from_plan(
    opts: &CycleOptions,
    plan: &ActionPlan,
    dropped: &[Outcome],
    duration_ms: u64,
) -> SyncReport {
    let sum_sizes = |actions: &[PlannedAction]| -> u64 {
        actions
            .iter()
            .map(|a| match a {
                PlannedAction::Download { size, .. } | PlannedAction::Upload { size, .. } => {
                    *size
                }
                _ => 0,
            })
            .sum()
    };

    SyncReport {
        mode: opts.mode.as_str().to_string(),
        dry_run: true,
        duration_ms,
        folders_created: plan.folder_creates.len() as u64,
        downloaded: plan.downloads.len() as u64,
        bytes_downloaded: sum_sizes(&plan.downloads),
        uploaded: plan.uploads.len() as u64,
        bytes_uploaded: sum_sizes(&plan.uploads),
        local_deleted: plan.local_deletes.len() as u64,
        remote_deleted: plan.remote_deletes.len() as u64,
        moved: plan.moves.len() as u64,
        conflicts: plan.conflicts.len() as u64,
        synced_updates: plan.synced_updates.len() as u64,
        errors: dropped
            .iter()
            .filter(|o| !o.success)
            .map(|o| crate::report::ReportError {
                path: o.path.clone(),
                error: o
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect(),
    }
}
