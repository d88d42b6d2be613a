//! Remote client port (driven/secondary port)
//!
//! This module defines the capability set the sync engine consumes for all
//! remote-drive operations. The production implementation targets Microsoft
//! OneDrive via the Graph API, but the engine only sees this trait plus the
//! deterministic error classification below, never the wire protocol.
//!
//! ## Design Notes
//!
//! - Delta enumeration is page-at-a-time: the engine calls
//!   [`RemoteClient::delta_page`] in a loop, persisting the cursor only
//!   after a page has been fully applied. A page carrying a
//!   `terminal_token` is the last page of the enumeration.
//! - Downloads stream into a caller-supplied writer so a multi-gigabyte
//!   file never has to fit in memory.
//! - Every error carries an [`ErrorClass`]; classification is a pure
//!   function of the failure (for HTTP failures, of the status code), so
//!   retry decisions are deterministic and testable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::domain::drive::{DriveId, ItemId};
use crate::domain::item::ItemType;

// ============================================================================
// Error taxonomy
// ============================================================================

/// How the engine should react to a failed remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Abort the cycle (auth expired, quota exceeded, corrupt state)
    Fatal,
    /// Retry with backoff, then demote to skippable
    Retryable,
    /// Record a failed outcome for the one item and continue
    Skippable,
}

/// Classify an HTTP status code
///
/// The mapping is fixed:
/// - 401/403 → fatal (authentication/authorization expired)
/// - 507 → fatal (quota exceeded)
/// - 408, 412, 429, 509 and any ≥500 → retryable
/// - everything else → skippable
#[must_use]
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 | 507 => ErrorClass::Fatal,
        408 | 412 | 429 | 509 => ErrorClass::Retryable,
        s if s >= 500 => ErrorClass::Retryable,
        _ => ErrorClass::Skippable,
    }
}

/// Error type for all remote operations
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Authentication failed or the token expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The drive is out of storage quota (HTTP 507)
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// An HTTP failure with a known status code
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connect, DNS, mid-body reset)
    #[error("network error: {0}")]
    Network(String),

    /// The upload session URL is no longer valid
    #[error("upload session expired: {0}")]
    SessionExpired(String),

    /// The remote invalidated our delta token; a full enumeration is needed
    #[error("delta token invalidated")]
    TokenInvalidated,

    /// The remote rejected the request as malformed (bad name, bad range)
    #[error("validation rejected: {0}")]
    Validation(String),

    /// Local I/O failed while feeding or draining a transfer
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Classify this error for the executor's retry policy
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Auth(_) | RemoteError::QuotaExceeded(_) => ErrorClass::Fatal,
            RemoteError::Http { status, .. } => classify_status(*status),
            RemoteError::Network(_) => ErrorClass::Retryable,
            // A dead session URL is recovered by opening a new session,
            // not by re-sending the same request.
            RemoteError::SessionExpired(_) => ErrorClass::Skippable,
            RemoteError::TokenInvalidated => ErrorClass::Retryable,
            RemoteError::Validation(_) => ErrorClass::Skippable,
            RemoteError::Io(_) => ErrorClass::Skippable,
        }
    }
}

// ============================================================================
// Delta types
// ============================================================================

/// An item as reported by the remote
///
/// This is a port-level DTO, not a baseline row; the delta ingester maps
/// it onto [`crate::domain::Item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: ItemId,
    pub name: String,
    pub parent_drive_id: Option<DriveId>,
    pub parent_id: Option<ItemId>,
    pub item_type: ItemType,
    pub size: Option<u64>,
    /// quickXorHash in Base64, files only
    pub quick_xor_hash: Option<String>,
    pub etag: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

/// One change from a delta page
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// The item was created or updated (also covers moves/renames)
    Upsert(RemoteItem),
    /// The item was deleted
    Delete(ItemId),
}

/// One page of a delta enumeration
///
/// Exactly one of `next_token` / `terminal_token` is set: `next_token`
/// resumes the enumeration mid-stream, `terminal_token` is the cursor to
/// store for the next incremental cycle.
#[derive(Debug, Clone)]
pub struct DeltaPage {
    pub changes: Vec<Change>,
    pub next_token: Option<String>,
    pub terminal_token: Option<String>,
}

impl DeltaPage {
    /// Returns true if this is the last page of the enumeration
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal_token.is_some()
    }
}

// ============================================================================
// Upload session types
// ============================================================================

/// A freshly created resumable upload session
#[derive(Debug, Clone)]
pub struct RemoteUploadSession {
    pub url: String,
    pub expiry: Option<DateTime<Utc>>,
}

/// Acknowledgement of one uploaded chunk
#[derive(Debug, Clone)]
pub struct ChunkAck {
    /// Next byte the server expects; `None` once the upload completed
    pub next_expected: Option<u64>,
    /// The final item, present only on the completing chunk
    pub item: Option<RemoteItem>,
}

// ============================================================================
// RemoteClient trait
// ============================================================================

/// The capability set the engine needs from the remote drive
///
/// ## Implementation Notes
///
/// - Implementations must not retry internally; the executor owns the
///   retry budget and consults [`RemoteError::class`].
/// - `download`/`download_range` write into the supplied writer and
///   return the byte count; implementations flush before returning.
/// - `resume_status` reports the next byte offset the server expects for
///   an in-flight session, or a [`RemoteError::SessionExpired`] when the
///   session URL has gone stale.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one delta page
    ///
    /// `cursor` is either a stored terminal token (incremental sync), a
    /// mid-enumeration `next_token`, or `None` for a full enumeration
    /// from scratch.
    async fn delta_page(
        &self,
        drive_id: &DriveId,
        cursor: Option<&str>,
    ) -> Result<DeltaPage, RemoteError>;

    /// Fetch one item's metadata by ID
    async fn get_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Option<RemoteItem>, RemoteError>;

    /// Fetch one item's metadata by drive-root-relative path
    async fn get_item_by_path(
        &self,
        drive_id: &DriveId,
        path: &str,
    ) -> Result<Option<RemoteItem>, RemoteError>;

    /// List the children of a folder
    async fn list_children(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Create a folder under the given parent
    async fn create_folder(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteItem, RemoteError>;

    /// Move and/or rename an item
    async fn move_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> Result<RemoteItem, RemoteError>;

    /// Delete an item
    async fn delete_item(&self, drive_id: &DriveId, item_id: &ItemId)
        -> Result<(), RemoteError>;

    /// Download a file's full content into `writer`
    async fn download(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, RemoteError>;

    /// Download a file's content starting at `offset` into `writer`
    ///
    /// Returns the bytes written plus the total size the server reported
    /// for the item, so the caller can detect a re-encoded file whose
    /// length no longer matches a stored partial.
    async fn download_range(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        offset: u64,
    ) -> Result<(u64, u64), RemoteError>;

    /// Upload a small file (at or below the simple-upload threshold)
    async fn upload_small(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        content: Vec<u8>,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<RemoteItem, RemoteError>;

    /// Open a resumable upload session for a large file
    async fn create_upload_session(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteUploadSession, RemoteError>;

    /// Upload one chunk within a session
    async fn upload_chunk(
        &self,
        session_url: &str,
        chunk: Vec<u8>,
        offset: u64,
        total_size: u64,
    ) -> Result<ChunkAck, RemoteError>;

    /// Query the next byte offset an in-flight session expects
    async fn resume_status(&self, session_url: &str) -> Result<u64, RemoteError>;
}

// ============================================================================
// Tests
// ============================================================================
