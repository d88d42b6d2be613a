//! The transfer manager
//!
//! Owns the byte-moving half of the executor: downloads land in
//! `.partial` siblings that survive cancellation and resume with range
//! requests; large uploads go through resumable sessions whose records
//! persist on disk across crashes. Content is verified with
//! quickXorHash on both directions.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use onedrift_core::config::TransferConfig;
use onedrift_core::domain::{session_key, ContentHash, DriveId, ItemId, UploadSessionRecord};
use onedrift_core::ports::{ErrorClass, RemoteClient, RemoteError, RemoteItem};
use onedrift_scan::hash::{hash_file, QuickXorHasher};
use onedrift_state::DiskSessionStore;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard ceiling on configured hash-mismatch retries
const MAX_HASH_RETRIES_CAP: u32 = 100;

// ============================================================================
// Errors
// ============================================================================

/// Transfer failures
#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote rejected or failed the operation
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transfer was cancelled; any partial file is preserved
    #[error("transfer cancelled")]
    Cancelled,

    /// Caller passed unusable arguments
    #[error("invalid transfer request: {0}")]
    Invalid(String),
}

impl TransferError {
    /// Classification for the executor's retry policy
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::Remote(e) => e.class(),
            TransferError::Io(_) => ErrorClass::Skippable,
            TransferError::Cancelled => ErrorClass::Fatal,
            TransferError::Invalid(_) => ErrorClass::Skippable,
        }
    }

    /// Returns true for cancellation (partials must survive)
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of a completed download
#[derive(Debug)]
pub struct DownloadResult {
    pub bytes: u64,
    pub hash: ContentHash,
    /// False when the remote hash was known and never matched within the
    /// retry budget; the download is kept anyway
    pub hash_verified: bool,
}

/// Result of a completed upload
#[derive(Debug)]
pub struct UploadResult {
    pub item: RemoteItem,
    pub bytes: u64,
    pub local_hash: ContentHash,
    /// False when the server reported a different hash (the server's
    /// value is authoritative; this is a warning, not an error)
    pub hash_verified: bool,
}

// ============================================================================
// Hashing writer
// ============================================================================

/// Tees written bytes into a rolling quickXorHash
struct HashingWriter<W> {
    inner: W,
    hasher: QuickXorHasher,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: QuickXorHasher::new(),
        }
    }

    fn finish(self) -> (W, ContentHash) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// TransferManager
// ============================================================================

/// Options for one download
#[derive(Debug, Default, Clone)]
pub struct DownloadOptions {
    /// Remote hash to verify against, when known
    pub expected_hash: Option<ContentHash>,
    /// Remote size, for the post-download size check
    pub expected_size: Option<u64>,
    /// Remote mtime to stamp onto the finished file
    pub mtime: Option<DateTime<Utc>>,
}

/// Downloads and uploads with resume, verification, and cancellation
pub struct TransferManager {
    remote: Arc<dyn RemoteClient>,
    sessions: Arc<DiskSessionStore>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl TransferManager {
    /// Create a manager over the given remote and session store
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        sessions: Arc<DiskSessionStore>,
        config: TransferConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            sessions,
            config,
            cancel,
        }
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Download an item into `target_path`
    ///
    /// Streams into `target_path + ".partial"`, resuming an existing
    /// partial with a range request when possible. The partial is
    /// renamed into place only after hash verification; on cancellation
    /// it is preserved for the next run, on any other failure removed.
    pub async fn download_to_file(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        target_path: &Path,
        opts: &DownloadOptions,
    ) -> Result<DownloadResult, TransferError> {
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
            }
        }

        let partial_path = partial_path_for(target_path);
        let max_retries = self.config.max_hash_retries.min(MAX_HASH_RETRIES_CAP);
        let mut attempt: u32 = 0;

        loop {
            let result = self
                .download_attempt(drive_id, item_id, &partial_path, opts)
                .await;

            let (bytes, hash) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    if e.is_cancelled() {
                        // The partial stays for the next run to resume.
                        return Err(e);
                    }
                    let _ = tokio::fs::remove_file(&partial_path).await;
                    return Err(e);
                }
            };

            let verified = match &opts.expected_hash {
                None => true,
                Some(expected) => &hash == expected,
            };

            if !verified && attempt < max_retries {
                attempt += 1;
                warn!(
                    path = %target_path.display(),
                    attempt,
                    "downloaded content hash mismatch, retrying from scratch"
                );
                let _ = tokio::fs::remove_file(&partial_path).await;
                continue;
            }

            if !verified {
                warn!(
                    path = %target_path.display(),
                    "hash mismatch persisted after {max_retries} retries, accepting download"
                );
            }

            if let Some(expected_size) = opts.expected_size {
                let actual = tokio::fs::metadata(&partial_path).await?.len();
                if actual != expected_size {
                    warn!(
                        path = %target_path.display(),
                        actual,
                        expected = expected_size,
                        "downloaded size differs from remote size"
                    );
                }
            }

            if let Some(mtime) = opts.mtime {
                set_file_mtime(&partial_path, mtime).await?;
            }

            tokio::fs::rename(&partial_path, target_path).await?;
            debug!(path = %target_path.display(), bytes, "download finished");

            return Ok(DownloadResult {
                bytes,
                hash,
                hash_verified: verified,
            });
        }
    }

    /// One download pass into the partial: resume when possible,
    /// otherwise from scratch. Returns (bytes transferred, full hash).
    async fn download_attempt(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        partial_path: &Path,
        opts: &DownloadOptions,
    ) -> Result<(u64, ContentHash), TransferError> {
        // Try to resume an existing partial. The open handle is the
        // source of truth for its length (no separate stat).
        if let Ok(file) = tokio::fs::OpenOptions::new()
            .append(true)
            .open(partial_path)
            .await
        {
            let offset = file.metadata().await?.len();
            if offset > 0 {
                match self
                    .resume_into(drive_id, item_id, file, partial_path, offset, opts)
                    .await
                {
                    Ok(Some(result)) => return Ok(result),
                    Ok(None) => {
                        // Range not usable; fall through to a fresh pass.
                        debug!(path = %partial_path.display(), "resume not possible, restarting");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Fresh download, hashing as bytes stream in.
        let file = tokio::fs::File::create(partial_path).await?;
        let mut writer = HashingWriter::new(file);

        let bytes = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = self.remote.download(drive_id, item_id, &mut writer) => result?,
        };

        let (mut file, hash) = writer.finish();
        file.flush().await?;
        Ok((bytes, hash))
    }

    /// Append the remote suffix onto an open partial
    ///
    /// Returns `Ok(None)` when resume is not viable (range rejected, or
    /// the server reports a different total size than the partial
    /// implies; a re-encoded file is never spliced).
    async fn resume_into(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        mut file: tokio::fs::File,
        partial_path: &Path,
        offset: u64,
        opts: &DownloadOptions,
    ) -> Result<Option<(u64, ContentHash)>, TransferError> {
        if let Some(expected_size) = opts.expected_size {
            if offset > expected_size {
                return Ok(None);
            }
        }

        let range_result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = self.remote.download_range(drive_id, item_id, &mut file, offset) => result,
        };

        let (appended, total) = match range_result {
            Ok(pair) => pair,
            Err(e) if e.class() == ErrorClass::Fatal => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "range request failed, falling back to fresh download");
                return Ok(None);
            }
        };

        if offset + appended != total {
            warn!(
                offset,
                appended, total, "resumed download does not line up with server total"
            );
            return Ok(None);
        }

        file.flush().await?;
        drop(file);

        // The appended bytes were not streamed through the hasher; the
        // whole partial is re-hashed from byte zero before verification.
        let hash = hash_file(partial_path).await?;

        info!(offset, appended, "resumed partial download");
        Ok(Some((appended, hash)))
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Upload a local file into `parent_id/name`
    ///
    /// Small files go up in one request; larger ones use a resumable
    /// session whose record persists before the first chunk. A matching
    /// crash-left session resumes instead of restarting.
    pub async fn upload_file(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        local_path: &Path,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<UploadResult, TransferError> {
        if name.is_empty() {
            return Err(TransferError::Invalid("empty file name".to_string()));
        }
        if parent_id.as_str().is_empty() {
            return Err(TransferError::Invalid("empty parent id".to_string()));
        }

        // Hash first: the session record needs it, and post-upload
        // verification compares against it.
        let local_hash = hash_file(local_path).await?;
        let size = tokio::fs::metadata(local_path).await?.len();

        if size <= self.config.simple_upload_threshold {
            return self
                .upload_simple(drive_id, parent_id, name, local_path, size, local_hash, mtime)
                .await;
        }

        self.upload_session(drive_id, parent_id, name, local_path, size, local_hash)
            .await
    }

    async fn upload_simple(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        local_path: &Path,
        size: u64,
        local_hash: ContentHash,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<UploadResult, TransferError> {
        let content = tokio::fs::read(local_path).await?;

        let item = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = self.remote.upload_small(drive_id, parent_id, name, content, mtime) => result?,
        };

        let hash_verified = verify_remote_hash(&item, &local_hash, name);
        Ok(UploadResult {
            item,
            bytes: size,
            local_hash,
            hash_verified,
        })
    }

    async fn upload_session(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        local_path: &Path,
        size: u64,
        local_hash: ContentHash,
    ) -> Result<UploadResult, TransferError> {
        let local_path_str = local_path.to_string_lossy().to_string();
        let key = session_key(drive_id, &local_path_str);

        // A crash-left session resumes only if the file is unchanged.
        if let Ok(Some(record)) = self.sessions.get(&key) {
            if record.matches_file(&local_hash) {
                match self.resume_session(&record, local_path, size).await {
                    Ok(item) => {
                        let _ = self.sessions.delete(&key);
                        let hash_verified = verify_remote_hash(&item, &local_hash, name);
                        return Ok(UploadResult {
                            item,
                            bytes: size,
                            local_hash,
                            hash_verified,
                        });
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        // A dead session would otherwise retry forever;
                        // drop the record no matter what went wrong.
                        let _ = self.sessions.delete(&key);
                        match e {
                            TransferError::Remote(RemoteError::SessionExpired(_)) => {
                                debug!(name, "stored session expired, opening a fresh one");
                            }
                            other => return Err(other),
                        }
                    }
                }
            } else {
                debug!(name, "local file changed since session was opened, discarding it");
                let _ = self.sessions.delete(&key);
            }
        }

        // Fresh session: persist the record before the first chunk so a
        // crash mid-upload can find it again.
        let session = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = self.remote.create_upload_session(drive_id, parent_id, name) => result?,
        };
        let mut record = UploadSessionRecord::new(
            drive_id.clone(),
            local_path_str,
            session.url.clone(),
            size,
            local_hash.clone(),
        );
        record.expiry = session.expiry;
        self.sessions
            .put(&record)
            .map_err(|e| TransferError::Invalid(format!("failed to persist session: {e}")))?;

        match self.send_chunks(&session.url, local_path, 0, size).await {
            Ok(item) => {
                let _ = self.sessions.delete(&record.id);
                let hash_verified = verify_remote_hash(&item, &local_hash, name);
                Ok(UploadResult {
                    item,
                    bytes: size,
                    local_hash,
                    hash_verified,
                })
            }
            // Leave the record for the next run to resume.
            Err(e) => Err(e),
        }
    }

    /// Resume a stored session from wherever the server says it stopped
    async fn resume_session(
        &self,
        record: &UploadSessionRecord,
        local_path: &Path,
        size: u64,
    ) -> Result<RemoteItem, TransferError> {
        let offset = self.remote.resume_status(&record.session_url).await?;
        info!(
            path = %local_path.display(),
            offset,
            "resuming upload session"
        );
        self.send_chunks(&record.session_url, local_path, offset, size)
            .await
    }

    /// Push chunks from `offset` to the end of the file
    async fn send_chunks(
        &self,
        session_url: &str,
        local_path: &Path,
        mut offset: u64,
        total_size: u64,
    ) -> Result<RemoteItem, TransferError> {
        let chunk_size = self.config.upload_chunk_size.max(320 * 1024) as usize;
        let mut file = tokio::fs::File::open(local_path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let remaining = (total_size - offset) as usize;
            let this_chunk = remaining.min(chunk_size);
            let mut buf = vec![0u8; this_chunk];
            file.read_exact(&mut buf).await?;

            let ack = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                result = self.remote.upload_chunk(session_url, buf, offset, total_size) => result?,
            };

            if let Some(item) = ack.item {
                return Ok(item);
            }

            offset = match ack.next_expected {
                Some(next) => {
                    if next != offset + this_chunk as u64 {
                        // Server-side gap; follow its offset.
                        file.seek(std::io::SeekFrom::Start(next)).await?;
                    }
                    next
                }
                None => offset + this_chunk as u64,
            };

            if offset >= total_size {
                return Err(TransferError::Remote(RemoteError::Validation(
                    "session consumed all bytes without returning an item".to_string(),
                )));
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// The `.partial` sibling for a target path
fn partial_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".partial");
    target.with_file_name(name)
}

/// Stamp a remote mtime onto a local file
async fn set_file_mtime(path: &Path, mtime: DateTime<Utc>) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        let system_time: std::time::SystemTime = mtime.into();
        file.set_modified(system_time)
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?
}

/// Compare the server-reported hash with the local one (warning only)
fn verify_remote_hash(item: &RemoteItem, local_hash: &ContentHash, name: &str) -> bool {
    match &item.quick_xor_hash {
        Some(remote) if remote == local_hash.as_str() => true,
        Some(remote) => {
            warn!(
                name,
                local = %local_hash,
                remote,
                "server reported a different content hash after upload"
            );
            false
        }
        // No hash in the response; nothing to verify against.
        None => true,
    }
}

// ============================================================================
// Tests
// ============================================================================
