//! The plan executor
//!
//! Runs the nine phases strictly in order. Sequential phases (folder
//! creates, moves, deletes, conflicts) process one action at a time;
//! downloads and uploads run on bounded worker pools. Each action gets
//! the shared retry policy: transient failures back off up to three
//! times, fatal failures cancel the remaining work (in-flight tasks are
//! drained), everything else records a failed outcome and moves on.
//!
//! The executor never mutates the state store; it reads it for parent
//! resolution and emits [`Outcome`]s for the orchestrator to commit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use onedrift_core::domain::{ConflictRecord, DriveId, ItemId};
use onedrift_core::ports::{ErrorClass, RemoteClient};
use onedrift_state::StateStore;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ingest::backoff_delay;
use crate::plan::{ActionPlan, PlannedAction};
use crate::report::{ActionKind, Outcome};
use crate::transfer::{DownloadOptions, TransferError, TransferManager};

/// Retry budget per action
const MAX_RETRIES: u32 = 3;

// ============================================================================
// Executor
// ============================================================================

/// Executes an [`ActionPlan`] against the remote and the local tree
pub struct Executor {
    drive_id: DriveId,
    remote: Arc<dyn RemoteClient>,
    store: Arc<StateStore>,
    transfers: Arc<TransferManager>,
    /// Local sync root
    root: PathBuf,
    cancel: CancellationToken,
    download_workers: usize,
    upload_workers: usize,
    /// Folders created by phase 1 of this very plan, path -> remote id
    created_folders: Mutex<HashMap<String, ItemId>>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drive_id: DriveId,
        remote: Arc<dyn RemoteClient>,
        store: Arc<StateStore>,
        transfers: Arc<TransferManager>,
        root: PathBuf,
        cancel: CancellationToken,
        download_workers: usize,
        upload_workers: usize,
    ) -> Self {
        Self {
            drive_id,
            remote,
            store,
            transfers,
            root,
            cancel,
            download_workers: download_workers.max(1),
            upload_workers: upload_workers.max(1),
            created_folders: Mutex::new(HashMap::new()),
        }
    }

    /// Run all phases and return every outcome
    pub async fn execute(self: Arc<Self>, plan: ActionPlan) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(plan.len());

        // Phase 1: folder creates, parent before child.
        for action in plan.folder_creates {
            if self.should_stop(&mut outcomes, &action) {
                continue;
            }
            outcomes.push(self.run_folder_create(action).await);
        }

        // Phase 2: moves.
        for action in plan.moves {
            if self.should_stop(&mut outcomes, &action) {
                continue;
            }
            outcomes.push(self.run_move(action).await);
        }

        // Phase 3: downloads (parallel, bounded).
        outcomes.extend(
            self.clone()
                .run_parallel(plan.downloads, self.download_workers, |this, action| {
                    Box::pin(async move { this.run_download(action).await })
                })
                .await,
        );

        // Phase 4: uploads (parallel, bounded).
        outcomes.extend(
            self.clone()
                .run_parallel(plan.uploads, self.upload_workers, |this, action| {
                    Box::pin(async move { this.run_upload(action).await })
                })
                .await,
        );

        // Phase 5: local deletes, children before parents.
        for action in plan.local_deletes {
            if self.should_stop(&mut outcomes, &action) {
                continue;
            }
            outcomes.push(self.run_local_delete(action).await);
        }

        // Phase 6: remote deletes, children before parents.
        for action in plan.remote_deletes {
            if self.should_stop(&mut outcomes, &action) {
                continue;
            }
            outcomes.push(self.run_remote_delete(action).await);
        }

        // Phase 7: conflicts (copies written before any overwrite).
        for action in plan.conflicts {
            if self.should_stop(&mut outcomes, &action) {
                continue;
            }
            outcomes.push(self.run_conflict(action).await);
        }

        // Phase 8: synced updates (no I/O).
        for action in plan.synced_updates {
            if let PlannedAction::SyncedUpdate {
                path,
                item_id,
                hash,
            } = action
            {
                let mut outcome = Outcome::success(ActionKind::SyncedUpdate, path);
                outcome.item_id = Some(item_id);
                outcome.hash = hash;
                outcomes.push(outcome);
            }
        }

        // Phase 9: cleanups (no I/O).
        for action in plan.cleanups {
            if let PlannedAction::CleanupBaseline { item_id, path } = action {
                let mut outcome = Outcome::success(ActionKind::Cleanup, path);
                outcome.item_id = Some(item_id);
                outcomes.push(outcome);
            }
        }

        info!(
            outcomes = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.success).count(),
            "plan execution finished"
        );
        outcomes
    }

    /// Record a cancelled outcome instead of starting new work
    fn should_stop(&self, outcomes: &mut Vec<Outcome>, action: &PlannedAction) -> bool {
        if self.cancel.is_cancelled() {
            outcomes.push(Outcome::failure(
                action.kind(),
                action.path(),
                "cancelled before execution",
            ));
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Parallel phase driver
    // ------------------------------------------------------------------

    async fn run_parallel<F>(
        self: Arc<Self>,
        actions: Vec<PlannedAction>,
        workers: usize,
        run: F,
    ) -> Vec<Outcome>
    where
        F: Fn(
                Arc<Self>,
                PlannedAction,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = Outcome> + Send>,
            > + Send
            + Sync
            + 'static,
    {
        let run = Arc::new(run);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set: JoinSet<Outcome> = JoinSet::new();
        let mut paths_by_task: HashMap<tokio::task::Id, (ActionKind, String)> = HashMap::new();

        for action in actions {
            let this = self.clone();
            let run = run.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let kind = action.kind();
            let path = action.path().to_string();

            let handle = set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed; treat it as a stop.
                    Err(_) => {
                        return Outcome::failure(kind, action.path(), "worker pool closed")
                    }
                };
                if cancel.is_cancelled() {
                    return Outcome::failure(kind, action.path(), "cancelled before execution");
                }
                (*run)(this, action).await
            });
            paths_by_task.insert(handle.id(), (kind, path));
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(join_error) => {
                    // A panicking worker costs its one action, nothing more.
                    let (kind, path) = paths_by_task
                        .get(&join_error.id())
                        .cloned()
                        .unwrap_or((ActionKind::Download, "<unknown>".to_string()));
                    error!(path, error = %join_error, "transfer worker panicked");
                    outcomes.push(Outcome::failure(
                        kind,
                        path,
                        format!("worker panicked: {join_error}"),
                    ));
                }
            }
        }
        outcomes
    }

    // ------------------------------------------------------------------
    // Parent resolution
    // ------------------------------------------------------------------

    /// Resolve the remote ID of a path's parent folder
    ///
    /// Consults, in order: folders created earlier in this plan, the
    /// baseline, and finally fails.
    async fn resolve_parent(&self, path: &str) -> Result<ItemId, String> {
        let parent_path = match path.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };

        if !parent_path.is_empty() {
            if let Some(id) = self.created_folders.lock().await.get(&parent_path) {
                return Ok(id.clone());
            }
            match self.store.get_item_by_path(&self.drive_id, &parent_path).await {
                Ok(Some(item)) => return Ok(item.item_id),
                Ok(None) => return Err(format!("parent folder '{parent_path}' unknown")),
                Err(e) => return Err(format!("parent lookup failed: {e}")),
            }
        }

        match self.store.get_root_item(&self.drive_id).await {
            Ok(Some(root)) => Ok(root.item_id),
            Ok(None) => Err("drive root not in baseline".to_string()),
            Err(e) => Err(format!("root lookup failed: {e}")),
        }
    }

    // ------------------------------------------------------------------
    // Retry policy
    // ------------------------------------------------------------------

    /// Run one fallible step under the shared retry policy
    ///
    /// Retryable failures back off up to [`MAX_RETRIES`] times and are
    /// then demoted to skippable. Fatal failures cancel the cycle.
    async fn with_retry<T, F, Fut>(&self, what: &str, path: &str, f: F) -> Result<T, String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransferError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(what, path, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err("cancelled".to_string()),
                Err(e) => match e.class() {
                    ErrorClass::Fatal => {
                        error!(what, path, error = %e, "fatal error, aborting cycle");
                        self.cancel.cancel();
                        return Err(format!("{e}"));
                    }
                    ErrorClass::Retryable if attempt < MAX_RETRIES => {
                        let delay = backoff_delay(attempt);
                        warn!(
                            what,
                            path,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "transient failure, backing off"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err("cancelled".to_string()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    _ => return Err(format!("{e}")),
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase implementations
    // ------------------------------------------------------------------

    async fn run_folder_create(&self, action: PlannedAction) -> Outcome {
        match action {
            PlannedAction::CreateRemoteFolder { path } => {
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                let parent_id = match self.resolve_parent(&path).await {
                    Ok(id) => id,
                    Err(e) => {
                        return Outcome::failure(ActionKind::CreateFolderRemote, path, e)
                    }
                };

                let result = self
                    .with_retry("create folder", &path, || {
                        let name = name.clone();
                        let parent_id = parent_id.clone();
                        async move {
                            self.remote
                                .create_folder(&self.drive_id, &parent_id, &name)
                                .await
                                .map_err(TransferError::from)
                        }
                    })
                    .await;

                match result {
                    Ok(item) => {
                        self.created_folders
                            .lock()
                            .await
                            .insert(path.clone(), item.id.clone());
                        let mut outcome =
                            Outcome::success(ActionKind::CreateFolderRemote, path);
                        outcome.remote_item = Some(item);
                        outcome
                    }
                    Err(e) => Outcome::failure(ActionKind::CreateFolderRemote, path, e),
                }
            }
            PlannedAction::CreateLocalFolder { path } => {
                let target = self.root.join(&path);
                match tokio::fs::create_dir_all(&target).await {
                    Ok(()) => Outcome::success(ActionKind::CreateFolderLocal, path),
                    Err(e) => Outcome::failure(
                        ActionKind::CreateFolderLocal,
                        path,
                        format!("create dir failed: {e}"),
                    ),
                }
            }
            other => Outcome::failure(
                other.kind(),
                other.path(),
                "action scheduled in the wrong phase",
            ),
        }
    }

    async fn run_move(&self, action: PlannedAction) -> Outcome {
        match action {
            PlannedAction::LocalMove { from_path, to_path } => {
                let from = self.root.join(&from_path);
                let to = self.root.join(&to_path);
                if let Some(parent) = to.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return Outcome::failure(
                            ActionKind::LocalMove,
                            to_path,
                            format!("move target dir failed: {e}"),
                        );
                    }
                }
                match tokio::fs::rename(&from, &to).await {
                    Ok(()) => {
                        debug!(from = %from_path, to = %to_path, "moved local file");
                        let mut outcome = Outcome::success(ActionKind::LocalMove, to_path);
                        outcome.previous_path = Some(from_path);
                        outcome
                    }
                    Err(e) => Outcome::failure(
                        ActionKind::LocalMove,
                        to_path,
                        format!("local move failed: {e}"),
                    ),
                }
            }
            PlannedAction::RemoteMove {
                item_id,
                from_path,
                to_path,
            } => {
                let new_name = to_path.rsplit('/').next().unwrap_or(&to_path).to_string();
                let parent_id = match self.resolve_parent(&to_path).await {
                    Ok(id) => id,
                    Err(e) => return Outcome::failure(ActionKind::RemoteMove, to_path, e),
                };

                let result = self
                    .with_retry("move", &to_path, || {
                        let item_id = item_id.clone();
                        let parent_id = parent_id.clone();
                        let new_name = new_name.clone();
                        async move {
                            self.remote
                                .move_item(&self.drive_id, &item_id, &parent_id, &new_name)
                                .await
                                .map_err(TransferError::from)
                        }
                    })
                    .await;

                match result {
                    Ok(item) => {
                        let mut outcome = Outcome::success(ActionKind::RemoteMove, to_path);
                        outcome.remote_item = Some(item);
                        outcome.item_id = Some(item_id);
                        outcome.previous_path = Some(from_path);
                        outcome
                    }
                    Err(e) => Outcome::failure(ActionKind::RemoteMove, to_path, e),
                }
            }
            other => Outcome::failure(
                other.kind(),
                other.path(),
                "action scheduled in the wrong phase",
            ),
        }
    }

    async fn run_download(&self, action: PlannedAction) -> Outcome {
        let PlannedAction::Download {
            item_id,
            path,
            size,
            remote_hash,
            mtime,
        } = action
        else {
            return Outcome::failure(
                action.kind(),
                action.path(),
                "action scheduled in the wrong phase",
            );
        };

        let target = self.root.join(&path);
        let opts = DownloadOptions {
            expected_hash: remote_hash,
            expected_size: Some(size),
            mtime,
        };

        let result = self
            .with_retry("download", &path, || {
                let item_id = item_id.clone();
                let target = target.clone();
                let opts = opts.clone();
                async move {
                    self.transfers
                        .download_to_file(&self.drive_id, &item_id, &target, &opts)
                        .await
                }
            })
            .await;

        match result {
            Ok(download) => {
                let mut outcome = Outcome::success(ActionKind::Download, path);
                outcome.bytes = download.bytes;
                outcome.hash = Some(download.hash);
                outcome.hash_verified = download.hash_verified;
                outcome.item_id = Some(item_id);
                outcome
            }
            Err(e) => Outcome::failure(ActionKind::Download, path, e),
        }
    }

    async fn run_upload(&self, action: PlannedAction) -> Outcome {
        let PlannedAction::Upload { path, .. } = action else {
            return Outcome::failure(
                action.kind(),
                action.path(),
                "action scheduled in the wrong phase",
            );
        };

        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let local_path = self.root.join(&path);
        let parent_id = match self.resolve_parent(&path).await {
            Ok(id) => id,
            Err(e) => return Outcome::failure(ActionKind::Upload, path, e),
        };

        let mtime = tokio::fs::metadata(&local_path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(chrono::DateTime::<chrono::Utc>::from);

        let result = self
            .with_retry("upload", &path, || {
                let parent_id = parent_id.clone();
                let name = name.clone();
                let local_path = local_path.clone();
                async move {
                    self.transfers
                        .upload_file(&self.drive_id, &parent_id, &name, &local_path, mtime)
                        .await
                }
            })
            .await;

        match result {
            Ok(upload) => {
                let mut outcome = Outcome::success(ActionKind::Upload, path);
                outcome.bytes = upload.bytes;
                outcome.hash = Some(upload.local_hash);
                outcome.hash_verified = upload.hash_verified;
                outcome.remote_item = Some(upload.item);
                outcome
            }
            Err(e) => Outcome::failure(ActionKind::Upload, path, e),
        }
    }

    async fn run_local_delete(&self, action: PlannedAction) -> Outcome {
        let PlannedAction::DeleteLocal {
            path,
            is_dir,
            item_id,
        } = action
        else {
            return Outcome::failure(
                action.kind(),
                action.path(),
                "action scheduled in the wrong phase",
            );
        };

        let target = self.root.join(&path);
        let result = if is_dir {
            // Children were deleted in earlier actions of this phase; a
            // non-empty directory means something local survived, and
            // that is a reason to stop, not to force.
            tokio::fs::remove_dir(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };

        match result {
            Ok(()) => {
                let mut outcome = Outcome::success(ActionKind::DeleteLocal, path);
                outcome.item_id = item_id;
                outcome
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut outcome = Outcome::success(ActionKind::DeleteLocal, path);
                outcome.item_id = item_id;
                outcome
            }
            Err(e) => Outcome::failure(
                ActionKind::DeleteLocal,
                path,
                format!("local delete failed: {e}"),
            ),
        }
    }

    async fn run_remote_delete(&self, action: PlannedAction) -> Outcome {
        let PlannedAction::DeleteRemote { item_id, path } = action else {
            return Outcome::failure(
                action.kind(),
                action.path(),
                "action scheduled in the wrong phase",
            );
        };

        let result = self
            .with_retry("remote delete", &path, || {
                let item_id = item_id.clone();
                async move {
                    self.remote
                        .delete_item(&self.drive_id, &item_id)
                        .await
                        .map_err(TransferError::from)
                }
            })
            .await;

        match result {
            Ok(()) => {
                let mut outcome = Outcome::success(ActionKind::DeleteRemote, path);
                outcome.item_id = Some(item_id);
                outcome
            }
            Err(e) => Outcome::failure(ActionKind::DeleteRemote, path, e),
        }
    }

    async fn run_conflict(&self, action: PlannedAction) -> Outcome {
        let PlannedAction::RecordConflict {
            path,
            kind,
            download,
            auto_resolution,
            local_hash,
            remote_hash,
        } = action
        else {
            return Outcome::failure(
                action.kind(),
                action.path(),
                "action scheduled in the wrong phase",
            );
        };

        let target = self.root.join(&path);

        // The local bytes are preserved before anything overwrites them.
        if download.is_some() && target.exists() {
            if let Err(e) = onedrift_conflict::preserve_local_copy(&target).await {
                return Outcome::failure(
                    ActionKind::Conflict,
                    path,
                    format!("failed to preserve local copy: {e}"),
                );
            }
        }

        let mut bytes = 0;
        let mut downloaded_hash = None;
        if let Some(item_id) = &download {
            let opts = DownloadOptions {
                expected_hash: remote_hash.clone(),
                expected_size: None,
                mtime: None,
            };
            let result = self
                .with_retry("conflict download", &path, || {
                    let item_id = item_id.clone();
                    let target = target.clone();
                    let opts = opts.clone();
                    async move {
                        self.transfers
                            .download_to_file(&self.drive_id, &item_id, &target, &opts)
                            .await
                    }
                })
                .await;
            match result {
                Ok(download_result) => {
                    bytes = download_result.bytes;
                    downloaded_hash = Some(download_result.hash);
                }
                Err(e) => return Outcome::failure(ActionKind::Conflict, path, e),
            }
        }

        let mut record = ConflictRecord::new(
            self.drive_id.clone(),
            download.clone(),
            path.clone(),
            kind,
        )
        .with_hashes(local_hash, remote_hash.or(downloaded_hash.clone()));
        if let Some((resolution, source, note)) = auto_resolution {
            record.resolve(resolution, source, Some(note));
        }

        let mut outcome = Outcome::success(ActionKind::Conflict, path);
        outcome.bytes = bytes;
        outcome.hash = downloaded_hash;
        outcome.item_id = download;
        outcome.conflict = Some(record);
        outcome
    }
}
