//! The edit classifier
//!
//! For every path with at least one side present, assign exactly one
//! label describing what happened since the last converged state and
//! what the planner must do about it.
//!
//! Content comparison uses hashes when both sides have one, otherwise
//! `(size, mtime rounded to whole seconds)`. Local hashing is lazy: a
//! file is only hashed when size+mtime cannot settle the question, or
//! when a convergence/conflict check needs the actual content identity.

use chrono::{DateTime, Utc};
use onedrift_core::domain::ContentHash;
use tracing::debug;

use crate::view::{BaselineSide, LocalSide, PathView, RemoteSide};

// ============================================================================
// Labels
// ============================================================================

/// File classification outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLabel {
    /// Nothing changed on either side
    Unchanged,
    /// Remote changed, local untouched: download
    RemoteEdit,
    /// Local changed, remote untouched: upload
    LocalEdit,
    /// Both sides independently reached the same content: metadata-only
    ConvergentEdit,
    /// Both sides changed to different content
    EditEditConflict,
    /// Local file removed, remote untouched: delete remote
    LocalDelete,
    /// Remote deleted but local has edits: preserve by re-uploading
    PreservedLocalEdit,
    /// Remote deleted, local untouched: delete local
    RemoteDelete,
    /// Remote edited but local deleted: restore the remote version
    EditDeleteConflict,
    /// Gone on both sides: clean the baseline row
    BothDeleted,
    /// Created on both sides with identical content: metadata-only
    ConvergentCreate,
    /// Created on both sides with different content
    CreateCreateConflict,
    /// Exists only locally: upload
    NewLocal,
    /// Exists only remotely: download
    NewRemote,
}

/// Directory classification outcomes
///
/// Directories have no content hash; presence and the fate of their
/// descendants drive the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLabel {
    Unchanged,
    /// Exists only remotely: create locally
    NewRemote,
    /// Exists only locally: create remotely
    NewLocal,
    /// Remote deleted the folder and nothing local survived: delete local
    RemoteDelete,
    /// Remote deleted the folder but local descendants still carry
    /// changes: keep the tree and recreate it remotely
    RemoteDeleteWithSurvivors,
    /// Local deleted the folder: delete remote
    LocalDelete,
    /// Created on both sides: converged, metadata-only
    ConvergentCreate,
    /// Gone on both sides: clean the baseline row
    BothDeleted,
}

/// One label per path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    File(FileLabel),
    Dir(DirLabel),
}

/// A view with its assigned label and any hash computed along the way
#[derive(Debug, Clone)]
pub struct Classified {
    pub view: PathView,
    pub label: Label,
    /// Local content hash, when classification had to compute it
    pub local_hash: Option<ContentHash>,
}

// ============================================================================
// Lazy hashing
// ============================================================================

/// Provider of local content hashes, called only when the classifier
/// actually needs one
#[async_trait::async_trait]
pub trait LocalHashProvider: Send + Sync {
    async fn hash(&self, rel_path: &str) -> anyhow::Result<ContentHash>;
}

// ============================================================================
// Comparison helpers
// ============================================================================

/// Compare mtimes rounded to whole seconds
fn mtime_eq(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.timestamp() == b.timestamp(),
        _ => false,
    }
}

/// Did the remote change relative to the baseline?
fn remote_differs(baseline: &BaselineSide, remote: &RemoteSide) -> bool {
    match (&baseline.hash, &remote.hash) {
        (Some(b), Some(r)) => b != r,
        // No hash on one side: fall back to size + rounded mtime.
        _ => baseline.size != remote.size || !mtime_eq(baseline.mtime, remote.mtime),
    }
}

/// Did the local file change relative to the baseline?
///
/// Size mismatch decides immediately; equal size + equal rounded mtime
/// is trusted as unchanged; only the ambiguous remainder is hashed.
async fn local_differs(
    path: &str,
    baseline: &BaselineSide,
    local: &LocalSide,
    hasher: &dyn LocalHashProvider,
    computed: &mut Option<ContentHash>,
) -> anyhow::Result<bool> {
    if local.size != baseline.size {
        return Ok(true);
    }
    if mtime_eq(local.mtime, baseline.mtime) {
        return Ok(false);
    }

    let hash = ensure_hash(path, hasher, computed).await?;
    Ok(match &baseline.hash {
        Some(b) => b != &hash,
        None => true,
    })
}

async fn ensure_hash(
    path: &str,
    hasher: &dyn LocalHashProvider,
    computed: &mut Option<ContentHash>,
) -> anyhow::Result<ContentHash> {
    if let Some(hash) = computed {
        return Ok(hash.clone());
    }
    let hash = hasher.hash(path).await?;
    *computed = Some(hash.clone());
    Ok(hash)
}

/// Does the local content equal the remote content?
async fn local_matches_remote(
    path: &str,
    remote: &RemoteSide,
    local: &LocalSide,
    hasher: &dyn LocalHashProvider,
    computed: &mut Option<ContentHash>,
) -> anyhow::Result<bool> {
    let Some(remote_hash) = &remote.hash else {
        // Without a remote hash, sizes are the only signal; unequal size
        // is definitely different, equal size is not proof of identity.
        return Ok(false);
    };
    if local.size != remote.size {
        return Ok(false);
    }
    let hash = ensure_hash(path, hasher, computed).await?;
    Ok(&hash == remote_hash)
}

// ============================================================================
// File classification
// ============================================================================

async fn classify_file(
    view: &PathView,
    hasher: &dyn LocalHashProvider,
) -> anyhow::Result<(FileLabel, Option<ContentHash>)> {
    let mut computed: Option<ContentHash> = None;

    let label = match (&view.baseline, &view.remote, &view.local) {
        // ---- Baseline present ------------------------------------------
        (Some(b), Some(r), Some(l)) => {
            let remote_changed = remote_differs(b, r);
            let local_changed =
                local_differs(&view.path, b, l, hasher, &mut computed).await?;
            match (remote_changed, local_changed) {
                (false, false) => FileLabel::Unchanged,
                (false, true) => FileLabel::LocalEdit,
                (true, false) => FileLabel::RemoteEdit,
                (true, true) => {
                    if local_matches_remote(&view.path, r, l, hasher, &mut computed).await? {
                        FileLabel::ConvergentEdit
                    } else {
                        FileLabel::EditEditConflict
                    }
                }
            }
        }
        (Some(b), None, Some(l)) => {
            if local_differs(&view.path, b, l, hasher, &mut computed).await? {
                FileLabel::PreservedLocalEdit
            } else {
                FileLabel::RemoteDelete
            }
        }
        (Some(b), Some(r), None) => {
            if remote_differs(b, r) {
                FileLabel::EditDeleteConflict
            } else {
                FileLabel::LocalDelete
            }
        }
        (Some(_), None, None) => FileLabel::BothDeleted,

        // ---- No baseline -----------------------------------------------
        (None, Some(r), Some(l)) => {
            if local_matches_remote(&view.path, r, l, hasher, &mut computed).await? {
                FileLabel::ConvergentCreate
            } else {
                FileLabel::CreateCreateConflict
            }
        }
        (None, None, Some(_)) => FileLabel::NewLocal,
        (None, Some(_), None) => FileLabel::NewRemote,
        (None, None, None) => FileLabel::Unchanged, // filtered out upstream
    };

    Ok((label, computed))
}

// ============================================================================
// Directory classification
// ============================================================================

fn classify_dir(view: &PathView, has_survivors: bool) -> DirLabel {
    match (&view.baseline, &view.remote, &view.local) {
        (Some(_), Some(_), Some(_)) => DirLabel::Unchanged,
        (Some(_), None, Some(_)) => {
            if has_survivors {
                DirLabel::RemoteDeleteWithSurvivors
            } else {
                DirLabel::RemoteDelete
            }
        }
        (Some(_), Some(_), None) => DirLabel::LocalDelete,
        (Some(_), None, None) => DirLabel::BothDeleted,
        (None, Some(_), Some(_)) => DirLabel::ConvergentCreate,
        (None, Some(_), None) => DirLabel::NewRemote,
        (None, None, Some(_)) => DirLabel::NewLocal,
        (None, None, None) => DirLabel::Unchanged,
    }
}

// ============================================================================
// Whole-tree classification
// ============================================================================

/// File labels whose local content must survive a parent-folder deletion
fn keeps_local_content(label: FileLabel) -> bool {
    matches!(
        label,
        FileLabel::LocalEdit
            | FileLabel::NewLocal
            | FileLabel::PreservedLocalEdit
            | FileLabel::EditEditConflict
            | FileLabel::CreateCreateConflict
    )
}

/// Classify every view: files first, then directories (which need to
/// know whether their descendants carry surviving local changes).
pub async fn classify_all(
    views: Vec<PathView>,
    hasher: &dyn LocalHashProvider,
) -> anyhow::Result<Vec<Classified>> {
    let mut out: Vec<Classified> = Vec::with_capacity(views.len());
    let mut survivor_prefixes: Vec<String> = Vec::new();

    let (dirs, files): (Vec<PathView>, Vec<PathView>) = views
        .into_iter()
        .partition(|v| v.kind.is_container());

    for view in files {
        let (label, local_hash) = classify_file(&view, hasher).await?;
        debug!(path = %view.path, ?label, "classified file");
        if keeps_local_content(label) {
            survivor_prefixes.push(view.path.clone());
        }
        out.push(Classified {
            view,
            label: Label::File(label),
            local_hash,
        });
    }

    for view in dirs {
        let prefix = format!("{}/", view.path);
        let has_survivors = survivor_prefixes.iter().any(|p| p.starts_with(&prefix));
        let label = classify_dir(&view, has_survivors);
        debug!(path = %view.path, ?label, "classified directory");
        out.push(Classified {
            view,
            label: Label::Dir(label),
            local_hash: None,
        });
    }

    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use onedrift_core::domain::{ItemId, ItemType};
    use std::collections::HashMap;

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const HASH_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBB=";
    const HASH_C: &str = "CCCCCCCCCCCCCCCCCCCCCCCCCCC=";

    /// Hash provider backed by a fixed map; panics on unexpected lookups
    /// so tests catch eager hashing.
    struct MapHasher {
        hashes: HashMap<String, ContentHash>,
    }

    impl MapHasher {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                hashes: entries
                    .iter()
                    .map(|(p, h)| (p.to_string(), ContentHash::new(*h).unwrap()))
                    .collect(),
            }
        }

        fn empty() -> Self {
            Self {
                hashes: HashMap::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl LocalHashProvider for MapHasher {
        async fn hash(&self, rel_path: &str) -> anyhow::Result<ContentHash> {
            self.hashes
                .get(rel_path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unexpected hash request for {rel_path}"))
        }
    }

    fn hash(s: &str) -> ContentHash {
        ContentHash::new(s).unwrap()
    }

    fn when(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn baseline(h: &str, size: u64, t: i64) -> Option<BaselineSide> {
        Some(BaselineSide {
            hash: Some(hash(h)),
            size,
            mtime: Some(when(t)),
        })
    }

    fn remote(h: &str, size: u64, t: i64) -> Option<RemoteSide> {
        Some(RemoteSide {
            item_id: ItemId::new("R1").unwrap(),
            hash: Some(hash(h)),
            size,
            mtime: Some(when(t)),
            etag: None,
        })
    }

    fn local(size: u64, t: i64) -> Option<LocalSide> {
        Some(LocalSide {
            size,
            mtime: Some(when(t)),
        })
    }

    fn file_view(
        b: Option<BaselineSide>,
        r: Option<RemoteSide>,
        l: Option<LocalSide>,
    ) -> PathView {
        PathView {
            path: "x.txt".to_string(),
            kind: ItemType::File,
            item: None,
            baseline: b,
            remote: r,
            local: l,
        }
    }

    async fn label_of(view: PathView, hasher: &MapHasher) -> FileLabel {
        let (label, _) = classify_file(&view, hasher).await.unwrap();
        label
    }

    mod file_table_tests {
        use super::*;

        #[tokio::test]
        async fn unchanged_everywhere() {
            // Equal size and mtime on the local side: no hash computed.
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_A, 5, 0), local(5, 0));
            assert_eq!(label_of(view, &MapHasher::empty()).await, FileLabel::Unchanged);
        }

        #[tokio::test]
        async fn local_edit_uploads() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_A, 5, 0), local(9, 10));
            assert_eq!(label_of(view, &MapHasher::empty()).await, FileLabel::LocalEdit);
        }

        #[tokio::test]
        async fn touched_but_identical_local_is_unchanged() {
            // Same size, newer mtime, same content: hash settles it.
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_A, 5, 0), local(5, 60));
            let hasher = MapHasher::new(&[("x.txt", HASH_A)]);
            assert_eq!(label_of(view, &hasher).await, FileLabel::Unchanged);
        }

        #[tokio::test]
        async fn remote_edit_downloads() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_B, 7, 30), local(5, 0));
            assert_eq!(label_of(view, &MapHasher::empty()).await, FileLabel::RemoteEdit);
        }

        #[tokio::test]
        async fn convergent_edit_moves_no_bytes() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_B, 9, 30), local(9, 40));
            let hasher = MapHasher::new(&[("x.txt", HASH_B)]);
            assert_eq!(label_of(view, &hasher).await, FileLabel::ConvergentEdit);
        }

        #[tokio::test]
        async fn edit_edit_conflict() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_B, 9, 30), local(7, 40));
            let hasher = MapHasher::new(&[("x.txt", HASH_C)]);
            assert_eq!(label_of(view, &hasher).await, FileLabel::EditEditConflict);
        }

        #[tokio::test]
        async fn remote_delete_untouched_local() {
            let view = file_view(baseline(HASH_A, 5, 0), None, local(5, 0));
            assert_eq!(
                label_of(view, &MapHasher::empty()).await,
                FileLabel::RemoteDelete
            );
        }

        #[tokio::test]
        async fn remote_delete_with_local_edit_preserves() {
            let view = file_view(baseline(HASH_A, 5, 0), None, local(9, 50));
            assert_eq!(
                label_of(view, &MapHasher::empty()).await,
                FileLabel::PreservedLocalEdit
            );
        }

        #[tokio::test]
        async fn local_delete_untouched_remote() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_A, 5, 0), None);
            assert_eq!(
                label_of(view, &MapHasher::empty()).await,
                FileLabel::LocalDelete
            );
        }

        #[tokio::test]
        async fn local_delete_of_remotely_edited_file_conflicts() {
            let view = file_view(baseline(HASH_A, 5, 0), remote(HASH_B, 9, 30), None);
            assert_eq!(
                label_of(view, &MapHasher::empty()).await,
                FileLabel::EditDeleteConflict
            );
        }

        #[tokio::test]
        async fn deleted_everywhere_cleans_up() {
            let view = file_view(baseline(HASH_A, 5, 0), None, None);
            assert_eq!(
                label_of(view, &MapHasher::empty()).await,
                FileLabel::BothDeleted
            );
        }

        #[tokio::test]
        async fn new_remote_downloads() {
            let view = file_view(None, remote(HASH_A, 5, 0), None);
            assert_eq!(label_of(view, &MapHasher::empty()).await, FileLabel::NewRemote);
        }

        #[tokio::test]
        async fn new_local_uploads() {
            let view = file_view(None, None, local(5, 0));
            assert_eq!(label_of(view, &MapHasher::empty()).await, FileLabel::NewLocal);
        }

        #[tokio::test]
        async fn convergent_create() {
            let view = file_view(None, remote(HASH_A, 5, 0), local(5, 20));
            let hasher = MapHasher::new(&[("x.txt", HASH_A)]);
            assert_eq!(label_of(view, &hasher).await, FileLabel::ConvergentCreate);
        }

        #[tokio::test]
        async fn create_create_conflict() {
            let view = file_view(None, remote(HASH_A, 5, 0), local(5, 20));
            let hasher = MapHasher::new(&[("x.txt", HASH_B)]);
            assert_eq!(
                label_of(view, &hasher).await,
                FileLabel::CreateCreateConflict
            );
        }
    }

    mod dir_table_tests {
        use super::*;

        fn dir_view(path: &str, b: bool, r: bool, l: bool) -> PathView {
            PathView {
                path: path.to_string(),
                kind: ItemType::Folder,
                item: None,
                baseline: b.then(|| BaselineSide {
                    hash: None,
                    size: 0,
                    mtime: None,
                }),
                remote: r.then(|| RemoteSide {
                    item_id: ItemId::new("D1").unwrap(),
                    hash: None,
                    size: 0,
                    mtime: None,
                    etag: None,
                }),
                local: l.then(|| LocalSide {
                    size: 0,
                    mtime: None,
                }),
            }
        }

        #[test]
        fn presence_table() {
            assert_eq!(
                classify_dir(&dir_view("d", true, true, true), false),
                DirLabel::Unchanged
            );
            assert_eq!(
                classify_dir(&dir_view("d", false, true, false), false),
                DirLabel::NewRemote
            );
            assert_eq!(
                classify_dir(&dir_view("d", false, false, true), false),
                DirLabel::NewLocal
            );
            assert_eq!(
                classify_dir(&dir_view("d", true, false, true), false),
                DirLabel::RemoteDelete
            );
            assert_eq!(
                classify_dir(&dir_view("d", true, true, false), false),
                DirLabel::LocalDelete
            );
            assert_eq!(
                classify_dir(&dir_view("d", true, false, false), false),
                DirLabel::BothDeleted
            );
            assert_eq!(
                classify_dir(&dir_view("d", false, true, true), false),
                DirLabel::ConvergentCreate
            );
        }

        #[test]
        fn survivors_upgrade_remote_delete() {
            assert_eq!(
                classify_dir(&dir_view("d", true, false, true), true),
                DirLabel::RemoteDeleteWithSurvivors
            );
        }

        #[tokio::test]
        async fn classify_all_detects_survivors_under_deleted_folder() {
            let dir = dir_view("docs", true, false, true);
            // A locally edited file below the remotely deleted folder.
            let mut file = file_view(
                baseline(HASH_A, 5, 0),
                None,
                local(9, 50),
            );
            file.path = "docs/edited.txt".to_string();

            let classified = classify_all(vec![dir, file], &MapHasher::empty())
                .await
                .unwrap();

            let dir_label = classified
                .iter()
                .find(|c| c.view.path == "docs")
                .map(|c| c.label)
                .unwrap();
            assert_eq!(
                dir_label,
                Label::Dir(DirLabel::RemoteDeleteWithSurvivors)
            );
        }
    }
}
