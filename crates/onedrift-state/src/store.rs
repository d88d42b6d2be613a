//! SQLite implementation of the baseline state store
//!
//! All domain persistence goes through [`StateStore`]: baseline items with
//! derived path materialization, delta cursors, conflict records, stale
//! files, and the configuration snapshot. Resumable upload sessions live
//! beside the database as JSON files (see [`crate::sessions`]).
//!
//! ## Type Mapping
//!
//! | Domain Type        | SQL Type | Strategy                               |
//! |--------------------|----------|----------------------------------------|
//! | DriveId, ItemId    | TEXT     | canonical string via `as_str()`        |
//! | ItemType           | TEXT     | `as_str()` / `FromStr`                 |
//! | ContentHash        | TEXT     | Base64 string via `as_str()`           |
//! | DateTime<Utc>      | TEXT     | RFC 3339 via `to_rfc3339()`            |
//! | ConflictKind etc.  | TEXT     | `as_str()` / `FromStr`                 |
//! | ConflictDecision[] | TEXT     | serde_json array                       |
//!
//! ## Writer discipline
//!
//! The store is single-logical-writer: one `StateStore` per drive
//! performs all mutations, multi-row operations run in one transaction,
//! and readers see committed state only.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use onedrift_core::domain::{
    ConflictDecision, ConflictKind, ConflictRecord, ContentHash, DeltaCursor, DriveId, Item,
    ItemId, ItemType, Resolution, ResolutionSource, StaleRecord,
};

use crate::{StateError, StatePool};

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::Serialization(format!("failed to parse datetime '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StateError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_optional_hash(s: Option<String>) -> Result<Option<ContentHash>, StateError> {
    match s {
        Some(ref val) if !val.is_empty() => ContentHash::new(val.clone())
            .map(Some)
            .map_err(|e| StateError::Serialization(e.to_string())),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn item_from_row(row: &SqliteRow) -> Result<Item, StateError> {
    let drive_id: String = row.get("drive_id");
    let item_id: String = row.get("item_id");
    let parent_drive_id: Option<String> = row.get("parent_drive_id");
    let parent_id: Option<String> = row.get("parent_id");
    let name: String = row.get("name");
    let path: String = row.get("path");
    let item_type: String = row.get("item_type");
    let size: i64 = row.get("size");
    let quick_xor_hash: Option<String> = row.get("quick_xor_hash");
    let etag: Option<String> = row.get("etag");
    let created_at: Option<String> = row.get("created_at");
    let updated_at: Option<String> = row.get("updated_at");
    let is_deleted: i64 = row.get("is_deleted");
    let deleted_at: Option<String> = row.get("deleted_at");
    let synced_hash: Option<String> = row.get("synced_hash");
    let synced_at: Option<String> = row.get("synced_at");

    let item_id = ItemId::new(item_id).map_err(|e| StateError::Serialization(e.to_string()))?;
    let parent_id = match parent_id {
        Some(ref p) if !p.is_empty() => {
            Some(ItemId::new(p.clone()).map_err(|e| StateError::Serialization(e.to_string()))?)
        }
        _ => None,
    };
    let item_type = ItemType::from_str(&item_type)
        .map_err(|e| StateError::Serialization(e.to_string()))?;

    Ok(Item {
        drive_id: DriveId::new(&drive_id),
        item_id,
        parent_drive_id: parent_drive_id
            .filter(|p| !p.is_empty())
            .map(|p| DriveId::new(&p)),
        parent_id,
        name,
        path,
        item_type,
        size: size as u64,
        quick_xor_hash: parse_optional_hash(quick_xor_hash)?,
        etag,
        created_at: parse_optional_datetime(created_at)?,
        updated_at: parse_optional_datetime(updated_at)?,
        is_deleted: is_deleted != 0,
        deleted_at: parse_optional_datetime(deleted_at)?,
        synced_hash: parse_optional_hash(synced_hash)?,
        synced_at: parse_optional_datetime(synced_at)?,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<ConflictRecord, StateError> {
    let id: String = row.get("id");
    let drive_id: String = row.get("drive_id");
    let item_id: Option<String> = row.get("item_id");
    let path: String = row.get("path");
    let detected_at: String = row.get("detected_at");
    let local_hash: Option<String> = row.get("local_hash");
    let remote_hash: Option<String> = row.get("remote_hash");
    let local_mtime: Option<String> = row.get("local_mtime");
    let remote_mtime: Option<String> = row.get("remote_mtime");
    let kind: String = row.get("kind");
    let resolution: String = row.get("resolution");
    let resolved_at: Option<String> = row.get("resolved_at");
    let resolved_by: Option<String> = row.get("resolved_by");
    let history: String = row.get("history");

    let id = uuid::Uuid::parse_str(&id)
        .map_err(|e| StateError::Serialization(format!("invalid conflict id '{id}': {e}")))?;
    let item_id = match item_id {
        Some(ref i) if !i.is_empty() => {
            Some(ItemId::new(i.clone()).map_err(|e| StateError::Serialization(e.to_string()))?)
        }
        _ => None,
    };
    let history: Vec<ConflictDecision> = serde_json::from_str(&history)
        .map_err(|e| StateError::Serialization(format!("invalid conflict history: {e}")))?;

    Ok(ConflictRecord {
        id,
        drive_id: DriveId::new(&drive_id),
        item_id,
        path,
        detected_at: parse_datetime(&detected_at)?,
        local_hash: parse_optional_hash(local_hash)?,
        remote_hash: parse_optional_hash(remote_hash)?,
        local_mtime: parse_optional_datetime(local_mtime)?,
        remote_mtime: parse_optional_datetime(remote_mtime)?,
        kind: ConflictKind::from_str(&kind)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        resolution: Resolution::from_str(&resolution)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        resolved_at: parse_optional_datetime(resolved_at)?,
        resolved_by: match resolved_by {
            Some(ref s) if !s.is_empty() => Some(
                ResolutionSource::from_str(s)
                    .map_err(|e| StateError::Serialization(e.to_string()))?,
            ),
            _ => None,
        },
        history,
    })
}

fn stale_from_row(row: &SqliteRow) -> Result<StaleRecord, StateError> {
    let drive_id: String = row.get("drive_id");
    let item_id: String = row.get("item_id");
    let path: String = row.get("path");
    let detected_at: String = row.get("detected_at");
    let reason: String = row.get("reason");

    Ok(StaleRecord {
        drive_id: DriveId::new(&drive_id),
        item_id: ItemId::new(item_id).map_err(|e| StateError::Serialization(e.to_string()))?,
        path,
        detected_at: parse_datetime(&detected_at)?,
        reason,
    })
}

// ============================================================================
// StateStore
// ============================================================================

/// SQLite-backed baseline state store
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Creates a store over an opened pool
    pub fn new(pool: &StatePool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    // ------------------------------------------------------------------
    // Item operations
    // ------------------------------------------------------------------

    /// Fetch an item by key; `Ok(None)` on miss
    pub async fn get_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Option<Item>, StateError> {
        let row = sqlx::query("SELECT * FROM items WHERE drive_id = ? AND item_id = ?")
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(item_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Fetch the root row of a drive
    pub async fn get_root_item(&self, drive_id: &DriveId) -> Result<Option<Item>, StateError> {
        let row = sqlx::query(
            "SELECT * FROM items WHERE drive_id = ? AND item_type = 'root' AND is_deleted = 0",
        )
        .bind(drive_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(item_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Fetch a live item by its materialized path
    pub async fn get_item_by_path(
        &self,
        drive_id: &DriveId,
        path: &str,
    ) -> Result<Option<Item>, StateError> {
        let row = sqlx::query(
            "SELECT * FROM items WHERE drive_id = ? AND path = ? AND is_deleted = 0",
        )
        .bind(drive_id.as_str())
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(item_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Insert-or-update one item, writing its derived path
    pub async fn upsert_item(&self, item: &Item) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_item_conn(&mut tx, item).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert-or-update a batch of items in one transaction
    pub async fn batch_upsert(&self, items: &[Item]) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            Self::upsert_item_conn(&mut tx, item).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_item_conn(
        conn: &mut SqliteConnection,
        item: &Item,
    ) -> Result<(), StateError> {
        let path = Self::derive_path_conn(conn, item).await?;

        sqlx::query(
            "INSERT OR REPLACE INTO items \
             (drive_id, item_id, parent_drive_id, parent_id, name, path, item_type, \
              size, quick_xor_hash, etag, created_at, updated_at, \
              is_deleted, deleted_at, synced_hash, synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.drive_id.as_str())
        .bind(item.item_id.as_str())
        .bind(item.parent_drive_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(item.parent_id.as_ref().map(|i| i.as_str().to_string()))
        .bind(&item.name)
        .bind(&path)
        .bind(item.item_type.as_str())
        .bind(item.size as i64)
        .bind(item.quick_xor_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(&item.etag)
        .bind(item.created_at.map(|dt| dt.to_rfc3339()))
        .bind(item.updated_at.map(|dt| dt.to_rfc3339()))
        .bind(i64::from(item.is_deleted))
        .bind(item.deleted_at.map(|dt| dt.to_rfc3339()))
        .bind(item.synced_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(item.synced_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *conn)
        .await?;

        tracing::trace!(drive = %item.drive_id, item = %item.item_id, path = %path, "upserted item");
        Ok(())
    }

    /// Compute the derived path of `item` by materializing its parent chain
    ///
    /// Returns the empty string for the root and for orphans (any absent
    /// or tombstoned ancestor).
    async fn derive_path_conn(
        conn: &mut SqliteConnection,
        item: &Item,
    ) -> Result<String, StateError> {
        if item.item_type == ItemType::Root {
            return Ok(String::new());
        }
        let (Some(parent_drive), Some(parent_id)) = (&item.parent_drive_id, &item.parent_id)
        else {
            return Ok(String::new());
        };

        match Self::materialize_chain_conn(conn, parent_drive, parent_id).await? {
            None => Ok(String::new()),
            Some(parent_path) if parent_path.is_empty() => Ok(item.name.clone()),
            Some(parent_path) => Ok(format!("{parent_path}/{}", item.name)),
        }
    }

    /// Walk a parent chain to its root
    ///
    /// Returns `None` when the chain is broken (absent or deleted
    /// ancestor). A revisited key means the persisted parent links form a
    /// cycle, which is corrupt state, not a traversal problem.
    async fn materialize_chain_conn(
        conn: &mut SqliteConnection,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Option<String>, StateError> {
        let mut segments: Vec<String> = Vec::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut current = (drive_id.as_str().to_string(), item_id.as_str().to_string());

        loop {
            if !visited.insert(current.clone()) {
                return Err(StateError::CorruptState(format!(
                    "parent cycle detected at {}/{}",
                    current.0, current.1
                )));
            }

            let row = sqlx::query(
                "SELECT name, item_type, parent_drive_id, parent_id, is_deleted \
                 FROM items WHERE drive_id = ? AND item_id = ?",
            )
            .bind(&current.0)
            .bind(&current.1)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let is_deleted: i64 = row.get("is_deleted");
            if is_deleted != 0 {
                return Ok(None);
            }

            let item_type: String = row.get("item_type");
            if item_type == "root" {
                segments.reverse();
                return Ok(Some(segments.join("/")));
            }

            let name: String = row.get("name");
            segments.push(name);

            let parent_drive: Option<String> = row.get("parent_drive_id");
            let parent_id: Option<String> = row.get("parent_id");
            match (parent_drive, parent_id) {
                (Some(d), Some(i)) if !d.is_empty() && !i.is_empty() => {
                    current = (d, i);
                }
                _ => return Ok(None),
            }
        }
    }

    /// Materialize an item's path by walking its parent chain
    ///
    /// Returns the empty string if the item is absent or any ancestor is
    /// missing (orphan policy: no guessing).
    pub async fn materialize_path(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<String, StateError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::materialize_chain_conn(&mut conn, drive_id, item_id)
            .await?
            .unwrap_or_default())
    }

    /// Tombstone an item, preserving the row
    pub async fn mark_deleted(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        when: DateTime<Utc>,
    ) -> Result<(), StateError> {
        sqlx::query(
            "UPDATE items SET is_deleted = 1, deleted_at = ? \
             WHERE drive_id = ? AND item_id = ?",
        )
        .bind(when.to_rfc3339())
        .bind(drive_id.as_str())
        .bind(item_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Physically delete a row (used only for move-rewrite and cleanup)
    pub async fn delete_item_by_key(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<(), StateError> {
        sqlx::query("DELETE FROM items WHERE drive_id = ? AND item_id = ?")
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List the live children of an item
    pub async fn list_children(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Vec<Item>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM items \
             WHERE parent_drive_id = ? AND parent_id = ? AND is_deleted = 0 \
             ORDER BY name",
        )
        .bind(drive_id.as_str())
        .bind(item_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// List every live item on a drive (the root row is implicit)
    pub async fn list_all_active_items(
        &self,
        drive_id: &DriveId,
    ) -> Result<Vec<Item>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM items \
             WHERE drive_id = ? AND is_deleted = 0 AND item_type <> 'root' \
             ORDER BY path",
        )
        .bind(drive_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// List every item on a drive, tombstones included
    ///
    /// Tombstones carry the baseline side of a remote deletion, so the
    /// classifier needs them alongside the live rows.
    pub async fn list_items_with_tombstones(
        &self,
        drive_id: &DriveId,
    ) -> Result<Vec<Item>, StateError> {
        let rows = sqlx::query("SELECT * FROM items WHERE drive_id = ? ORDER BY path")
            .bind(drive_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// List live items with a known-converged hash
    pub async fn list_synced_items(&self, drive_id: &DriveId) -> Result<Vec<Item>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM items \
             WHERE drive_id = ? AND is_deleted = 0 \
               AND synced_hash IS NOT NULL AND synced_hash <> '' \
             ORDER BY path",
        )
        .bind(drive_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Count of live non-root items (the denominator of the big-delete gate)
    pub async fn count_active_items(&self, drive_id: &DriveId) -> Result<u64, StateError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM items \
             WHERE drive_id = ? AND is_deleted = 0 AND item_type <> 'root'",
        )
        .bind(drive_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// Rewrite materialized paths under a renamed/moved folder
    ///
    /// Rewrites `old_prefix` itself and everything under `old_prefix/` to
    /// use `new_prefix`, in one transaction.
    pub async fn cascade_path_update(
        &self,
        drive_id: &DriveId,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64, StateError> {
        let mut tx = self.pool.begin().await?;

        let exact = sqlx::query(
            "UPDATE items SET path = ? WHERE drive_id = ? AND path = ? AND is_deleted = 0",
        )
        .bind(new_prefix)
        .bind(drive_id.as_str())
        .bind(old_prefix)
        .execute(&mut *tx)
        .await?;

        let like_pattern = format!("{}/%", old_prefix.replace('%', "\\%").replace('_', "\\_"));
        let nested = sqlx::query(
            "UPDATE items \
             SET path = ? || substr(path, ?) \
             WHERE drive_id = ? AND path LIKE ? ESCAPE '\\' AND is_deleted = 0",
        )
        .bind(new_prefix)
        .bind(old_prefix.len() as i64 + 1)
        .bind(drive_id.as_str())
        .bind(&like_pattern)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let changed = exact.rows_affected() + nested.rows_affected();
        tracing::debug!(old = old_prefix, new = new_prefix, changed, "cascaded path update");
        Ok(changed)
    }

    /// Recompute every live item's materialized path from its parent chain
    ///
    /// Used after delta ingest, where pages arrive in arbitrary order and
    /// a child can be upserted before its parent.
    pub async fn rematerialize_paths(&self, drive_id: &DriveId) -> Result<u64, StateError> {
        #[derive(Clone)]
        struct Node {
            name: String,
            parent: Option<(String, String)>,
            is_root: bool,
            path: String,
        }

        let rows = sqlx::query(
            "SELECT item_id, name, item_type, parent_drive_id, parent_id, path \
             FROM items WHERE drive_id = ? AND is_deleted = 0",
        )
        .bind(drive_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut nodes: HashMap<String, Node> = HashMap::new();
        for row in &rows {
            let item_id: String = row.get("item_id");
            let item_type: String = row.get("item_type");
            let parent_drive: Option<String> = row.get("parent_drive_id");
            let parent_id: Option<String> = row.get("parent_id");
            nodes.insert(
                item_id,
                Node {
                    name: row.get("name"),
                    parent: match (parent_drive, parent_id) {
                        (Some(d), Some(i)) if !d.is_empty() && !i.is_empty() => Some((d, i)),
                        _ => None,
                    },
                    is_root: item_type == "root",
                    path: row.get("path"),
                },
            );
        }

        // Resolve each node's path by chasing parents within this drive;
        // a broken or foreign-drive link makes the node an orphan.
        fn resolve(
            id: &str,
            drive: &str,
            nodes: &HashMap<String, Node>,
            memo: &mut HashMap<String, Option<String>>,
            in_progress: &mut HashSet<String>,
        ) -> Result<Option<String>, StateError> {
            if let Some(cached) = memo.get(id) {
                return Ok(cached.clone());
            }
            if !in_progress.insert(id.to_string()) {
                return Err(StateError::CorruptState(format!(
                    "parent cycle detected at {drive}/{id}"
                )));
            }

            let result = match nodes.get(id) {
                None => None,
                Some(node) if node.is_root => Some(String::new()),
                Some(node) => match &node.parent {
                    Some((pd, pid)) if pd == drive => {
                        match resolve(pid, drive, nodes, memo, in_progress)? {
                            None => None,
                            Some(pp) if pp.is_empty() => Some(node.name.clone()),
                            Some(pp) => Some(format!("{pp}/{}", node.name)),
                        }
                    }
                    _ => None,
                },
            };

            in_progress.remove(id);
            memo.insert(id.to_string(), result.clone());
            Ok(result)
        }

        let mut memo: HashMap<String, Option<String>> = HashMap::new();
        let mut updates: Vec<(String, String)> = Vec::new();
        for (id, node) in &nodes {
            let mut in_progress = HashSet::new();
            let resolved = resolve(id, drive_id.as_str(), &nodes, &mut memo, &mut in_progress)?
                .unwrap_or_default();
            if resolved != node.path {
                updates.push((id.clone(), resolved));
            }
        }

        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for (item_id, path) in &updates {
            sqlx::query("UPDATE items SET path = ? WHERE drive_id = ? AND item_id = ?")
                .bind(path)
                .bind(drive_id.as_str())
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(drive = %drive_id, updated = updates.len(), "rematerialized paths");
        Ok(updates.len() as u64)
    }

    /// Clear the converged markers on a row
    ///
    /// Called after a deletion has been carried to the other side: the
    /// row stops classifying as "baseline present" and its tombstone
    /// ages out via retention.
    pub async fn clear_synced_markers(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<(), StateError> {
        sqlx::query(
            "UPDATE items SET synced_hash = NULL, synced_at = NULL \
             WHERE drive_id = ? AND item_id = ?",
        )
        .bind(drive_id.as_str())
        .bind(item_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Physically purge tombstones older than the retention window
    pub async fn cleanup_tombstones(&self, retention_days: u32) -> Result<u64, StateError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let result = sqlx::query("DELETE FROM items WHERE is_deleted = 1 AND deleted_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(purged = result.rows_affected(), "purged expired tombstones");
        }
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Delta page / cycle transactions
    // ------------------------------------------------------------------

    /// Apply one delta page atomically
    ///
    /// Upserts, tombstones, and the page cursor commit together; a failure
    /// anywhere rolls the whole page back so a crash mid-page re-reads it.
    pub async fn apply_delta_page(
        &self,
        drive_id: &DriveId,
        upserts: &[Item],
        deletes: &[(ItemId, DateTime<Utc>)],
        cursor: Option<&DeltaCursor>,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;

        for item in upserts {
            Self::upsert_item_conn(&mut tx, item).await?;
        }
        for (item_id, when) in deletes {
            sqlx::query(
                "UPDATE items SET is_deleted = 1, deleted_at = ? \
                 WHERE drive_id = ? AND item_id = ?",
            )
            .bind(when.to_rfc3339())
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;
        }
        if let Some(cursor) = cursor {
            Self::set_delta_cursor_conn(&mut tx, drive_id, cursor).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Commit a completed sync cycle atomically
    ///
    /// The new baseline rows, tombstones, physical purges, and the delta
    /// cursor they depend on land in one transaction (crash safety).
    pub async fn commit_cycle(
        &self,
        drive_id: &DriveId,
        upserts: &[Item],
        tombstones: &[(ItemId, DateTime<Utc>)],
        purges: &[ItemId],
        cursor: Option<&DeltaCursor>,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;

        for item in upserts {
            Self::upsert_item_conn(&mut tx, item).await?;
        }
        for (item_id, when) in tombstones {
            sqlx::query(
                "UPDATE items SET is_deleted = 1, deleted_at = ? \
                 WHERE drive_id = ? AND item_id = ?",
            )
            .bind(when.to_rfc3339())
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;
        }
        for item_id in purges {
            sqlx::query("DELETE FROM items WHERE drive_id = ? AND item_id = ?")
                .bind(drive_id.as_str())
                .bind(item_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        if let Some(cursor) = cursor {
            Self::set_delta_cursor_conn(&mut tx, drive_id, cursor).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delta cursor operations
    // ------------------------------------------------------------------

    async fn set_delta_cursor_conn(
        conn: &mut SqliteConnection,
        drive_id: &DriveId,
        cursor: &DeltaCursor,
    ) -> Result<(), StateError> {
        sqlx::query(
            "INSERT OR REPLACE INTO delta_cursors (drive_id, token, is_complete, updated_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(drive_id.as_str())
        .bind(&cursor.token)
        .bind(i64::from(cursor.is_complete))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Fetch the stored delta cursor for a drive
    pub async fn get_delta_cursor(
        &self,
        drive_id: &DriveId,
    ) -> Result<Option<DeltaCursor>, StateError> {
        let row = sqlx::query("SELECT token, is_complete FROM delta_cursors WHERE drive_id = ?")
            .bind(drive_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let token: String = r.get("token");
            let is_complete: i64 = r.get("is_complete");
            DeltaCursor {
                token,
                is_complete: is_complete != 0,
            }
        }))
    }

    /// Replace the stored delta cursor
    pub async fn set_delta_cursor(
        &self,
        drive_id: &DriveId,
        cursor: &DeltaCursor,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        Self::set_delta_cursor_conn(&mut tx, drive_id, cursor).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop the stored cursor (forces a full enumeration next cycle)
    pub async fn clear_delta_cursor(&self, drive_id: &DriveId) -> Result<(), StateError> {
        sqlx::query("DELETE FROM delta_cursors WHERE drive_id = ?")
            .bind(drive_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conflict operations
    // ------------------------------------------------------------------

    /// Save a conflict record (insert or update)
    pub async fn save_conflict(&self, conflict: &ConflictRecord) -> Result<(), StateError> {
        let history = serde_json::to_string(&conflict.history)
            .map_err(|e| StateError::Serialization(format!("conflict history: {e}")))?;

        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, drive_id, item_id, path, detected_at, local_hash, remote_hash, \
              local_mtime, remote_mtime, kind, resolution, resolved_at, resolved_by, history) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conflict.id.to_string())
        .bind(conflict.drive_id.as_str())
        .bind(conflict.item_id.as_ref().map(|i| i.as_str().to_string()))
        .bind(&conflict.path)
        .bind(conflict.detected_at.to_rfc3339())
        .bind(conflict.local_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(conflict.remote_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(conflict.local_mtime.map(|dt| dt.to_rfc3339()))
        .bind(conflict.remote_mtime.map(|dt| dt.to_rfc3339()))
        .bind(conflict.kind.as_str())
        .bind(conflict.resolution.as_str())
        .bind(conflict.resolved_at.map(|dt| dt.to_rfc3339()))
        .bind(conflict.resolved_by.map(|rb| rb.as_str().to_string()))
        .bind(&history)
        .execute(&self.pool)
        .await?;

        tracing::trace!(conflict = %conflict.id, path = %conflict.path, "saved conflict");
        Ok(())
    }

    /// Fetch all unresolved conflicts, newest first
    pub async fn list_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE resolution = 'unresolved' ORDER BY detected_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conflict_from_row).collect()
    }

    /// Fetch every conflict record, newest first
    pub async fn list_all_conflicts(&self) -> Result<Vec<ConflictRecord>, StateError> {
        let rows = sqlx::query("SELECT * FROM conflicts ORDER BY detected_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(conflict_from_row).collect()
    }

    /// Fetch the newest unresolved conflict on a path
    pub async fn find_unresolved_conflict(
        &self,
        drive_id: &DriveId,
        path: &str,
    ) -> Result<Option<ConflictRecord>, StateError> {
        let row = sqlx::query(
            "SELECT * FROM conflicts \
             WHERE drive_id = ? AND path = ? AND resolution = 'unresolved' \
             ORDER BY detected_at DESC LIMIT 1",
        )
        .bind(drive_id.as_str())
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Stale file operations
    // ------------------------------------------------------------------

    /// Record a baseline item excluded by the current filter set
    pub async fn save_stale_file(&self, record: &StaleRecord) -> Result<(), StateError> {
        sqlx::query(
            "INSERT OR REPLACE INTO stale_files \
             (drive_id, item_id, path, detected_at, reason) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.drive_id.as_str())
        .bind(record.item_id.as_str())
        .bind(&record.path)
        .bind(record.detected_at.to_rfc3339())
        .bind(&record.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List stale files for a drive
    pub async fn list_stale_files(
        &self,
        drive_id: &DriveId,
    ) -> Result<Vec<StaleRecord>, StateError> {
        let rows = sqlx::query("SELECT * FROM stale_files WHERE drive_id = ? ORDER BY path")
            .bind(drive_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(stale_from_row).collect()
    }

    /// Remove a stale record (the path came back into scope)
    pub async fn delete_stale_file(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<(), StateError> {
        sqlx::query("DELETE FROM stale_files WHERE drive_id = ? AND item_id = ?")
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Config snapshot operations
    // ------------------------------------------------------------------

    /// Fetch an opaque configuration value
    pub async fn get_config_value(&self, key: &str) -> Result<Option<String>, StateError> {
        let row = sqlx::query("SELECT value FROM config_snapshot WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Store an opaque configuration value
    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<(), StateError> {
        sqlx::query("INSERT OR REPLACE INTO config_snapshot (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Force durability of everything committed so far
    pub async fn checkpoint(&self) -> Result<(), StateError> {
        sqlx::raw_sql("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
