//! The delta ingester
//!
//! Pulls change pages from the remote and applies them to the state
//! store. Each page commits in one transaction together with its
//! continuation cursor, so a crash mid-page re-reads exactly that page;
//! applying a change is idempotent (upsert by key, tombstone by key).
//!
//! Transient failures back off exponentially with jitter; a remote
//! token invalidation restarts the enumeration from scratch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use onedrift_core::domain::{DeltaCursor, DriveId, Item, ItemId};
use onedrift_core::ports::{Change, ErrorClass, RemoteClient, RemoteError, RemoteItem};
use onedrift_state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;

/// Retry budget for one page fetch
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff
const BASE_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Move hints
// ============================================================================

/// A remote-side move observed during ingest: the item kept its key but
/// its parent or name changed since it was last reconciled.
#[derive(Debug, Clone)]
pub struct RemoteMoveHint {
    pub item_id: ItemId,
    /// Materialized path before the change was applied
    pub old_path: String,
}

/// Summary of one ingest phase
#[derive(Debug, Default)]
pub struct IngestResult {
    pub pages: u32,
    pub changes: u64,
    /// Remote-side moves, for the planner's move detection
    pub move_hints: Vec<RemoteMoveHint>,
    /// The terminal cursor, persisted with the cycle's outcomes
    pub terminal: Option<DeltaCursor>,
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with +/-25% jitter: 1s, 2s, 4s before each retry
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY.as_millis() as u64 * 2u64.saturating_pow(attempt);
    // Deterministic pseudo-jitter from the clock; a real RNG buys
    // nothing here.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter_range = base / 2; // 50% total span = +/-25%
    let jitter = if jitter_range == 0 {
        0
    } else {
        nanos % jitter_range
    };
    Duration::from_millis(base - jitter_range / 2 + jitter)
}

// ============================================================================
// DeltaIngester
// ============================================================================

/// Consumes delta pages and folds them into the baseline
pub struct DeltaIngester {
    remote: Arc<dyn RemoteClient>,
    store: Arc<StateStore>,
    cancel: CancellationToken,
}

impl DeltaIngester {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        store: Arc<StateStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            store,
            cancel,
        }
    }

    /// Run one full ingest phase for a drive
    ///
    /// Starts from the stored cursor (mid-enumeration page or previous
    /// terminal token), applies every page transactionally, and returns
    /// the terminal cursor without persisting it; the orchestrator
    /// commits it alongside the cycle's outcomes.
    pub async fn ingest(&self, drive_id: &DriveId) -> Result<IngestResult, EngineError> {
        let mut result = IngestResult::default();
        let mut cursor: Option<String> = self
            .store
            .get_delta_cursor(drive_id)
            .await?
            .map(|c| c.token);
        let mut restarted = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let page = match self.fetch_with_retry(drive_id, cursor.as_deref()).await {
                Ok(page) => page,
                Err(RemoteError::TokenInvalidated) if !restarted => {
                    warn!(drive = %drive_id, "delta token invalidated, restarting full enumeration");
                    self.store.clear_delta_cursor(drive_id).await?;
                    cursor = None;
                    restarted = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            result.pages += 1;
            result.changes += page.changes.len() as u64;

            let (upserts, deletes, mut hints) =
                self.map_changes(drive_id, page.changes).await?;
            result.move_hints.append(&mut hints);

            // The continuation cursor commits with the page it follows.
            let page_cursor = page.next_token.as_ref().map(|t| DeltaCursor::page(t));
            self.store
                .apply_delta_page(drive_id, &upserts, &deletes, page_cursor.as_ref())
                .await?;

            debug!(
                drive = %drive_id,
                page = result.pages,
                upserts = upserts.len(),
                deletes = deletes.len(),
                "applied delta page"
            );

            match (page.next_token, page.terminal_token) {
                (Some(next), _) => cursor = Some(next),
                (None, Some(terminal)) => {
                    result.terminal = Some(DeltaCursor::complete(terminal));
                    break;
                }
                (None, None) => {
                    warn!(drive = %drive_id, "delta page carried no continuation, stopping");
                    break;
                }
            }
        }

        // Pages arrive in arbitrary order; children may have landed
        // before their parents, leaving stale materialized paths.
        self.store.rematerialize_paths(drive_id).await?;

        info!(
            drive = %drive_id,
            pages = result.pages,
            changes = result.changes,
            moves = result.move_hints.len(),
            "delta ingest complete"
        );
        Ok(result)
    }

    /// Fetch one page, retrying transient failures with backoff
    async fn fetch_with_retry(
        &self,
        drive_id: &DriveId,
        cursor: Option<&str>,
    ) -> Result<onedrift_core::ports::DeltaPage, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.remote.delta_page(drive_id, cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.class() == ErrorClass::Retryable && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        drive = %drive_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient delta failure, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map wire changes onto baseline rows, preserving converged markers
    /// and collecting move hints for rows whose location changed
    #[allow(clippy::type_complexity)]
    async fn map_changes(
        &self,
        drive_id: &DriveId,
        changes: Vec<Change>,
    ) -> Result<
        (
            Vec<Item>,
            Vec<(ItemId, chrono::DateTime<Utc>)>,
            Vec<RemoteMoveHint>,
        ),
        EngineError,
    > {
        let now = Utc::now();
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        let mut hints = Vec::new();

        for change in changes {
            match change {
                Change::Delete(item_id) => deletes.push((item_id, now)),
                Change::Upsert(remote_item) => {
                    let existing = self.store.get_item(drive_id, &remote_item.id).await?;

                    if let Some(existing) = &existing {
                        let relocated = existing.parent_id != remote_item.parent_id
                            || existing.name != remote_item.name;
                        let was_synced = existing.synced_at.is_some()
                            || existing.synced_hash.is_some();
                        if relocated && was_synced && !existing.path.is_empty() {
                            hints.push(RemoteMoveHint {
                                item_id: remote_item.id.clone(),
                                old_path: existing.path.clone(),
                            });
                        }
                    }

                    upserts.push(remote_item_to_row(drive_id, remote_item, existing));
                }
            }
        }

        Ok((upserts, deletes, hints))
    }
}

/// Build a baseline row from a wire item, carrying converged markers
/// over from the existing row (delta replays must be idempotent).
pub(crate) fn remote_item_to_row(
    drive_id: &DriveId,
    remote: RemoteItem,
    existing: Option<Item>,
) -> Item {
    let quick_xor_hash = remote
        .quick_xor_hash
        .as_deref()
        .and_then(|h| onedrift_core::domain::ContentHash::new(h).ok());

    Item {
        drive_id: drive_id.clone(),
        item_id: remote.id,
        parent_drive_id: remote.parent_drive_id,
        parent_id: remote.parent_id,
        name: remote.name,
        path: String::new(), // derived on write
        item_type: remote.item_type,
        size: remote.size.unwrap_or(0),
        quick_xor_hash,
        etag: remote.etag,
        created_at: remote.created,
        updated_at: remote.modified,
        is_deleted: false,
        deleted_at: None,
        synced_hash: existing.as_ref().and_then(|e| e.synced_hash.clone()),
        synced_at: existing.as_ref().and_then(|e| e.synced_at),
    }
}

// ============================================================================
// Tests
// ============================================================================
