//! On-disk upload session records
//!
//! Resumable uploads persist one JSON file per session under
//! `upload-sessions/` in the data directory, named by the stable digest
//! of `(drive_id, local_path)`. The directory is `0700`, the files
//! `0600`.
//!
//! The JSON schema is stable across releases:
//! `{drive_id, remote_path, session_url, file_hash, file_size, created_at}`.
//! The field `remote_path` historically names the LOCAL path; it is kept
//! that way so records written by older builds keep resuming.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use onedrift_core::domain::{session_key, ContentHash, DriveId, UploadSessionRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::StateError;

/// Minimum interval between stale-session sweeps per process
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

// ============================================================================
// Wire format
// ============================================================================

/// Stable on-disk schema for one session record
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    drive_id: String,
    /// Historically the LOCAL path of the file being uploaded
    remote_path: String,
    session_url: String,
    file_hash: String,
    file_size: u64,
    created_at: DateTime<Utc>,
}

impl SessionFile {
    fn from_record(record: &UploadSessionRecord) -> Self {
        Self {
            drive_id: record.drive_id.as_str().to_string(),
            remote_path: record.local_path.clone(),
            session_url: record.session_url.clone(),
            file_hash: record.file_hash.as_str().to_string(),
            file_size: record.total_size,
            created_at: record.created_at,
        }
    }

    fn into_record(self) -> Result<UploadSessionRecord, StateError> {
        let drive_id = DriveId::new(&self.drive_id);
        let file_hash = ContentHash::new(self.file_hash)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(UploadSessionRecord {
            id: session_key(&drive_id, &self.remote_path),
            drive_id,
            item_id: None,
            local_path: self.remote_path,
            session_url: self.session_url,
            expiry: None,
            bytes_uploaded: 0,
            total_size: self.file_size,
            file_hash,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// DiskSessionStore
// ============================================================================

/// Upload session persistence in the data directory
pub struct DiskSessionStore {
    dir: PathBuf,
    last_sweep: Mutex<Option<Instant>>,
}

impl DiskSessionStore {
    /// Open (and create if needed) the session directory
    pub fn open(data_dir: &Path) -> Result<Self, StateError> {
        let dir = data_dir.join("upload-sessions");
        std::fs::create_dir_all(&dir).map_err(|e| {
            StateError::ConnectionFailed(format!(
                "failed to create session directory {}: {e}",
                dir.display()
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
        }

        Ok(Self {
            dir,
            last_sweep: Mutex::new(None),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Fetch a session record by key; `Ok(None)` on miss
    pub fn get(&self, id: &str) -> Result<Option<UploadSessionRecord>, StateError> {
        let path = self.path_for(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::ConnectionFailed(format!(
                    "failed to read session {}: {e}",
                    path.display()
                )))
            }
        };

        let file: SessionFile = serde_json::from_str(&content).map_err(|e| {
            StateError::Serialization(format!("corrupt session file {}: {e}", path.display()))
        })?;
        Ok(Some(file.into_record()?))
    }

    /// Persist a session record (written before the first chunk goes out)
    pub fn put(&self, record: &UploadSessionRecord) -> Result<(), StateError> {
        let path = self.path_for(&record.id);
        let content = serde_json::to_string_pretty(&SessionFile::from_record(record))
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| {
            StateError::ConnectionFailed(format!(
                "failed to write session {}: {e}",
                path.display()
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }

        debug!(session = %record.id, path = %record.local_path, "persisted upload session");
        Ok(())
    }

    /// Remove a session record (upload completed or abandoned)
    pub fn delete(&self, id: &str) -> Result<(), StateError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::ConnectionFailed(format!(
                "failed to delete session {}: {e}",
                path.display()
            ))),
        }
    }

    /// Sweep session files older than `max_age_days`
    ///
    /// Self-throttled to once per hour per process: the check is
    /// acquire, compare, release, then do the work. Returns the number
    /// of files removed, or `None` when throttled.
    pub fn sweep_stale(&self, max_age_days: u32) -> Option<u64> {
        {
            let mut last = self.last_sweep.lock().expect("sweep mutex poisoned");
            if matches!(*last, Some(at) if at.elapsed() < SWEEP_INTERVAL) {
                return None;
            }
            *last = Some(Instant::now());
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));
        let mut removed = 0u64;

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read session directory for sweep");
                return Some(0);
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str::<SessionFile>(&content).ok())
                .map(|file| file.created_at < cutoff)
                // Unreadable records can never be resumed; sweep them too.
                .unwrap_or(true);

            if stale {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                    debug!(path = %path.display(), "swept stale upload session");
                }
            }
        }

        Some(removed)
    }

    /// Reset the sweep throttle (test hook)
    #[doc(hidden)]
    pub fn reset_sweep_throttle(&self) {
        *self.last_sweep.lock().expect("sweep mutex poisoned") = None;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn record(path: &str) -> UploadSessionRecord {
        UploadSessionRecord::new(
            DriveId::new("abc"),
            path,
            "https://upload.example/s/1",
            5 * 1024 * 1024 + 1,
            ContentHash::new(HASH_A).unwrap(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();

        let rec = record("/sync/big.bin");
        store.put(&rec).unwrap();

        let loaded = store.get(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.local_path, "/sync/big.bin");
        assert_eq!(loaded.session_url, "https://upload.example/s/1");
        assert_eq!(loaded.total_size, 5 * 1024 * 1024 + 1);
        assert_eq!(loaded.id, rec.id);
    }

    #[test]
    fn test_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();
        assert!(store.get("deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();
        let rec = record("/sync/a.bin");
        store.put(&rec).unwrap();

        store.delete(&rec.id).unwrap();
        store.delete(&rec.id).unwrap();
        assert!(store.get(&rec.id).unwrap().is_none());
    }

    #[test]
    fn test_stable_schema_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();
        let rec = record("/sync/legacy.bin");
        store.put(&rec).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(format!(
            "upload-sessions/{}.json",
            rec.id
        )))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        // remote_path intentionally carries the local path.
        assert_eq!(value["remote_path"], "/sync/legacy.bin");
        assert!(value["session_url"].is_string());
        assert!(value["file_hash"].is_string());
        assert!(value["file_size"].is_u64());
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn test_sweep_removes_old_and_throttles() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();

        let mut old = record("/sync/old.bin");
        old.created_at = Utc::now() - chrono::Duration::days(10);
        store.put(&old).unwrap();
        let fresh = record("/sync/fresh.bin");
        store.put(&fresh).unwrap();

        let removed = store.sweep_stale(7).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&old.id).unwrap().is_none());
        assert!(store.get(&fresh.id).unwrap().is_some());

        // Second sweep inside the hour is throttled.
        assert!(store.sweep_stale(7).is_none());

        store.reset_sweep_throttle();
        assert_eq!(store.sweep_stale(7), Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = DiskSessionStore::open(dir.path()).unwrap();
        let rec = record("/sync/private.bin");
        store.put(&rec).unwrap();

        let session_dir = dir.path().join("upload-sessions");
        let dir_mode = std::fs::metadata(&session_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = std::fs::metadata(session_dir.join(format!("{}.json", rec.id)))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
