//! File-level conflict resolution
//!
//! Two operations:
//! - [`preserve_local_copy`] runs during a sync cycle, before a remote
//!   version overwrites a locally edited file
//! - [`apply_resolution`] runs when the operator settles a conflict via
//!   the CLI
//!
//! Both touch only the filesystem; the caller updates the conflict
//! record in the state store.

use std::path::{Path, PathBuf};

use chrono::Utc;
use onedrift_core::domain::Resolution;
use tracing::{debug, info};

use crate::namer::{find_conflict_copies, unique_conflict_copy_name};

/// What applying a resolution actually did on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The conflict copy replaced the original; next cycle uploads it
    LocalRestored { from: PathBuf },
    /// The original (remote version) stays; the conflict copy was removed
    RemoteKept { removed_copy: Option<PathBuf> },
}

/// Preserve the current local bytes as a conflict copy sibling
///
/// Called before the conflicting download overwrites the local file, so
/// the operator can always get their version back. Returns the copy's
/// path; fails if the original cannot be read.
pub async fn preserve_local_copy(original: &Path) -> anyhow::Result<PathBuf> {
    let name = original
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("path has no usable file name: {}", original.display()))?;
    let dir = original
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", original.display()))?;

    let copy_name = unique_conflict_copy_name(name, Utc::now(), |candidate| {
        dir.join(candidate).exists()
    });
    let copy_path = dir.join(&copy_name);

    tokio::fs::copy(original, &copy_path).await?;
    info!(
        original = %original.display(),
        copy = %copy_path.display(),
        "preserved local bytes as conflict copy"
    );
    Ok(copy_path)
}

/// Apply an operator's resolution to the files on disk
///
/// - `keep_local`: the newest conflict copy moves back over the original
///   (restoring the local bytes); the next sync cycle sees a local edit
///   and uploads it
/// - `keep_remote`: the original (already holding the remote bytes)
///   stays; the conflict copy is deleted
///
/// `merge` is not applied here; content merging is out of scope and the
/// record simply gets marked.
pub async fn apply_resolution(
    original: &Path,
    resolution: Resolution,
) -> anyhow::Result<ResolutionOutcome> {
    let copies = find_conflict_copies(original);
    let newest = copies.last().cloned();

    match resolution {
        Resolution::KeepLocal => {
            let copy = newest.ok_or_else(|| {
                anyhow::anyhow!(
                    "no conflict copy found beside {} to restore",
                    original.display()
                )
            })?;
            tokio::fs::rename(&copy, original).await?;
            debug!(restored = %original.display(), "restored local version from conflict copy");
            Ok(ResolutionOutcome::LocalRestored { from: copy })
        }
        Resolution::KeepRemote => {
            if let Some(copy) = &newest {
                tokio::fs::remove_file(copy).await?;
                debug!(removed = %copy.display(), "removed conflict copy");
            }
            Ok(ResolutionOutcome::RemoteKept {
                removed_copy: newest,
            })
        }
        Resolution::Unresolved | Resolution::Merge => Err(anyhow::anyhow!(
            "resolution '{resolution}' has no file-level application"
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
