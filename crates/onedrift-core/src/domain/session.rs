//! Upload session records
//!
//! A resumable upload survives a crash through its
//! [`UploadSessionRecord`]: enough state to find the session again
//! (a stable digest of drive + local path), prove the file has not
//! changed since (its hash), and continue at the right offset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::drive::{DriveId, ItemId};
use super::item::ContentHash;

// ============================================================================
// Session key
// ============================================================================

/// Stable lookup key for an upload session: SHA-256 over a
/// length-prefixed encoding of `(drive_id, local_path)`.
///
/// Each component is preceded by its byte length as a little-endian u64,
/// so `("ab", "c")` and `("a", "bc")` can never collide the way a plain
/// `drive:path` concatenation would.
#[must_use]
pub fn session_key(drive_id: &DriveId, local_path: &str) -> String {
    let mut hasher = Sha256::new();
    let drive = drive_id.as_str().as_bytes();
    hasher.update((drive.len() as u64).to_le_bytes());
    hasher.update(drive);
    let path = local_path.as_bytes();
    hasher.update((path.len() as u64).to_le_bytes());
    hasher.update(path);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// UploadSessionRecord
// ============================================================================

/// Persistent state for one resumable upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSessionRecord {
    /// Stable key: [`session_key`] of `(drive_id, local_path)`
    pub id: String,
    pub drive_id: DriveId,
    /// Remote item, when the upload replaces an existing file
    pub item_id: Option<ItemId>,
    pub local_path: String,
    pub session_url: String,
    pub expiry: Option<DateTime<Utc>>,
    pub bytes_uploaded: u64,
    pub total_size: u64,
    /// Hash of the local file at session creation; a changed hash
    /// invalidates the session
    pub file_hash: ContentHash,
    pub created_at: DateTime<Utc>,
}

impl UploadSessionRecord {
    /// Create a fresh record for a newly opened session
    #[must_use]
    pub fn new(
        drive_id: DriveId,
        local_path: impl Into<String>,
        session_url: impl Into<String>,
        total_size: u64,
        file_hash: ContentHash,
    ) -> Self {
        let local_path = local_path.into();
        Self {
            id: session_key(&drive_id, &local_path),
            drive_id,
            item_id: None,
            local_path,
            session_url: session_url.into(),
            expiry: None,
            bytes_uploaded: 0,
            total_size,
            file_hash,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the session's expiry has passed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if now >= expiry)
    }

    /// Returns true if the given hash still matches the file this
    /// session was opened for
    #[must_use]
    pub fn matches_file(&self, hash: &ContentHash) -> bool {
        &self.file_hash == hash
    }
}

// ============================================================================
// Tests
// ============================================================================
