//! Per-path three-way views
//!
//! A [`PathView`] joins what the engine knows about one path from three
//! sides: the baseline (last converged state), the remote (current delta
//! state), and the local disk. Views are transient; the classifier
//! consumes them and they are gone.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use onedrift_core::domain::{ContentHash, Item, ItemId, ItemType};
use onedrift_scan::{LocalEntry, LocalEntryKind};
use tracing::warn;

// ============================================================================
// Side types
// ============================================================================

/// The last converged state of a path
#[derive(Debug, Clone)]
pub struct BaselineSide {
    /// Converged content hash (files)
    pub hash: Option<ContentHash>,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

/// The remote's current state of a path
#[derive(Debug, Clone)]
pub struct RemoteSide {
    pub item_id: ItemId,
    pub hash: Option<ContentHash>,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// What the local disk holds at a path
#[derive(Debug, Clone)]
pub struct LocalSide {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

/// One path's three-way view
#[derive(Debug, Clone)]
pub struct PathView {
    pub path: String,
    /// File or folder (root never appears in a view)
    pub kind: ItemType,
    /// The backing baseline row, when one exists
    pub item: Option<Item>,
    pub baseline: Option<BaselineSide>,
    pub remote: Option<RemoteSide>,
    pub local: Option<LocalSide>,
}

impl PathView {
    /// Returns true when nothing on any side references this path
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.baseline.is_none() && self.remote.is_none() && self.local.is_none()
    }
}

// ============================================================================
// View construction
// ============================================================================

/// Returns true if the row has ever converged (baseline side present)
fn row_is_synced(item: &Item) -> bool {
    match item.item_type {
        ItemType::File => item.synced_hash.is_some(),
        _ => item.synced_at.is_some(),
    }
}

/// Join baseline rows and local scan entries into per-path views
///
/// `rows` must include tombstones (they carry the baseline side of a
/// remote deletion). Orphan rows (empty materialized path) are excluded:
/// their ancestry is unknown, so they never become plan targets.
pub fn build_views(rows: &[Item], local_entries: &[LocalEntry]) -> Vec<PathView> {
    let mut views: BTreeMap<String, PathView> = BTreeMap::new();

    for item in rows {
        if item.item_type == ItemType::Root {
            continue;
        }
        if item.path.is_empty() {
            // Orphan policy: a broken parent chain keeps the row out of
            // the cycle entirely.
            continue;
        }

        let baseline = row_is_synced(item).then(|| BaselineSide {
            hash: item.synced_hash.clone(),
            size: item.size,
            mtime: item.updated_at,
        });
        let remote = (!item.is_deleted).then(|| RemoteSide {
            item_id: item.item_id.clone(),
            hash: item.quick_xor_hash.clone(),
            size: item.size,
            mtime: item.updated_at,
            etag: item.etag.clone(),
        });

        if baseline.is_none() && remote.is_none() {
            // Never-synced tombstone: nothing to reconcile.
            continue;
        }

        // A tombstone and a live row can share a path when a file was
        // deleted remotely and re-created; the live row wins.
        if let Some(existing) = views.get(&item.path) {
            let existing_live = existing.item.as_ref().is_some_and(|i| !i.is_deleted);
            if existing_live {
                continue;
            }
        }

        views.insert(
            item.path.clone(),
            PathView {
                path: item.path.clone(),
                kind: item.item_type,
                item: Some(item.clone()),
                baseline,
                remote,
                local: None,
            },
        );
    }

    for entry in local_entries {
        let kind = match entry.kind {
            LocalEntryKind::File => ItemType::File,
            LocalEntryKind::Folder => ItemType::Folder,
        };
        let local = LocalSide {
            size: entry.size,
            mtime: entry.mtime,
        };

        match views.get_mut(&entry.rel_path) {
            Some(view) => {
                if view.kind != kind {
                    // A file on one side and a folder on the other cannot
                    // be reconciled; leave the local side out and let the
                    // remote state win.
                    warn!(
                        path = %entry.rel_path,
                        "local entry kind disagrees with remote, ignoring local side"
                    );
                    continue;
                }
                view.local = Some(local);
            }
            None => {
                views.insert(
                    entry.rel_path.clone(),
                    PathView {
                        path: entry.rel_path.clone(),
                        kind,
                        item: None,
                        baseline: None,
                        remote: None,
                        local: Some(local),
                    },
                );
            }
        }
    }

    views.into_values().filter(|v| !v.is_empty()).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use onedrift_core::domain::DriveId;

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn drive() -> DriveId {
        DriveId::new("abc")
    }

    fn file_row(path: &str, synced: bool) -> Item {
        let mut item = Item::file(
            drive(),
            ItemId::new(path.replace('/', "_")).unwrap(),
            ItemId::new("ROOT").unwrap(),
            path.rsplit('/').next().unwrap(),
            10,
            Some(ContentHash::new(HASH_A).unwrap()),
        );
        item.path = path.to_string();
        if synced {
            item.synced_hash = Some(ContentHash::new(HASH_A).unwrap());
            item.synced_at = Some(Utc::now());
        }
        item
    }

    fn local(path: &str, size: u64) -> LocalEntry {
        LocalEntry {
            rel_path: path.to_string(),
            kind: LocalEntryKind::File,
            size,
            mtime: Some(Utc::now()),
        }
    }

    #[test]
    fn test_synced_row_with_local_has_all_sides() {
        let rows = vec![file_row("a.txt", true)];
        let locals = vec![local("a.txt", 10)];
        let views = build_views(&rows, &locals);

        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert!(view.baseline.is_some());
        assert!(view.remote.is_some());
        assert!(view.local.is_some());
    }

    #[test]
    fn test_unsynced_row_has_no_baseline() {
        let rows = vec![file_row("new.txt", false)];
        let views = build_views(&rows, &[]);
        assert_eq!(views.len(), 1);
        assert!(views[0].baseline.is_none());
        assert!(views[0].remote.is_some());
    }

    #[test]
    fn test_tombstone_keeps_baseline_side_only() {
        let mut row = file_row("gone.txt", true);
        row.mark_deleted(Utc::now());
        let views = build_views(&[row], &[]);
        assert_eq!(views.len(), 1);
        assert!(views[0].baseline.is_some());
        assert!(views[0].remote.is_none());
    }

    #[test]
    fn test_orphans_are_excluded() {
        let mut row = file_row("x.txt", true);
        row.path = String::new();
        let views = build_views(&[row], &[]);
        assert!(views.is_empty());
    }

    #[test]
    fn test_local_only_path_creates_view() {
        let views = build_views(&[], &[local("fresh.txt", 4)]);
        assert_eq!(views.len(), 1);
        assert!(views[0].baseline.is_none());
        assert!(views[0].remote.is_none());
        assert!(views[0].local.is_some());
    }

    #[test]
    fn test_live_row_wins_over_tombstone_at_same_path() {
        // A remotely deleted file that was re-created keeps its old
        // tombstone around until retention; the live row must drive
        // classification.
        let mut tombstone = file_row("y.txt", true);
        tombstone.mark_deleted(Utc::now());
        let mut live = file_row("y.txt", true);
        live.item_id = ItemId::new("y_new").unwrap();

        for rows in [
            vec![tombstone.clone(), live.clone()],
            vec![live.clone(), tombstone.clone()],
        ] {
            let views = build_views(&rows, &[]);
            assert_eq!(views.len(), 1);
            assert!(views[0].remote.is_some(), "live row must win");
            assert_eq!(
                views[0].item.as_ref().unwrap().item_id,
                ItemId::new("y_new").unwrap()
            );
        }
    }

    #[test]
    fn test_never_synced_tombstone_yields_nothing() {
        let mut row = file_row("ghost.txt", false);
        row.mark_deleted(Utc::now());
        let views = build_views(&[row], &[]);
        assert!(views.is_empty());
    }
}
