//! Conflict records
//!
//! A [`ConflictRecord`] is the durable trace of a divergence the classifier
//! could not (or chose not to) resolve on its own. Records keep an ordered
//! history of decisions so `conflicts --history` can show how a path got
//! to its current state.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::drive::{DriveId, ItemId};
use super::errors::DomainError;
use super::item::ContentHash;

// ============================================================================
// ConflictKind / Resolution / ResolutionSource
// ============================================================================

/// The closed set of conflict shapes the classifier can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited the same file since the baseline
    EditEdit,
    /// One side edited while the other deleted
    EditDelete,
    /// Both sides created the same path with differing content
    CreateCreate,
}

impl ConflictKind {
    /// The persisted spelling of this kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::EditEdit => "edit_edit",
            ConflictKind::EditDelete => "edit_delete",
            ConflictKind::CreateCreate => "create_create",
        }
    }
}

impl Display for ConflictKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit_edit" => Ok(ConflictKind::EditEdit),
            "edit_delete" => Ok(ConflictKind::EditDelete),
            "create_create" => Ok(ConflictKind::CreateCreate),
            other => Err(DomainError::InvalidConflictField(other.to_string())),
        }
    }
}

/// How a conflict stands (or was settled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    KeepLocal,
    KeepRemote,
    Merge,
}

impl Resolution {
    /// The persisted spelling of this resolution
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Unresolved => "unresolved",
            Resolution::KeepLocal => "keep_local",
            Resolution::KeepRemote => "keep_remote",
            Resolution::Merge => "merge",
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(Resolution::Unresolved),
            "keep_local" => Ok(Resolution::KeepLocal),
            "keep_remote" => Ok(Resolution::KeepRemote),
            "merge" => Ok(Resolution::Merge),
            other => Err(DomainError::InvalidConflictField(other.to_string())),
        }
    }
}

/// Who settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    User,
    Auto,
}

impl ResolutionSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::User => "user",
            ResolutionSource::Auto => "auto",
        }
    }
}

impl Display for ResolutionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ResolutionSource::User),
            "auto" => Ok(ResolutionSource::Auto),
            other => Err(DomainError::InvalidConflictField(other.to_string())),
        }
    }
}

// ============================================================================
// ConflictDecision (history entry)
// ============================================================================

/// One entry in a conflict's decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub at: DateTime<Utc>,
    pub resolution: Resolution,
    pub source: ResolutionSource,
    /// Free-form note, e.g. "remote deleted, local edit preserved"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================================================
// ConflictRecord
// ============================================================================

/// Durable record of a detected conflict on one path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub drive_id: DriveId,
    pub item_id: Option<ItemId>,
    pub path: String,
    pub detected_at: DateTime<Utc>,
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    pub kind: ConflictKind,
    pub resolution: Resolution,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ResolutionSource>,
    /// Ordered log of decisions, oldest first
    pub history: Vec<ConflictDecision>,
}

impl ConflictRecord {
    /// Create a new unresolved conflict record
    #[must_use]
    pub fn new(
        drive_id: DriveId,
        item_id: Option<ItemId>,
        path: impl Into<String>,
        kind: ConflictKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            drive_id,
            item_id,
            path: path.into(),
            detected_at: Utc::now(),
            local_hash: None,
            remote_hash: None,
            local_mtime: None,
            remote_mtime: None,
            kind,
            resolution: Resolution::Unresolved,
            resolved_at: None,
            resolved_by: None,
            history: Vec::new(),
        }
    }

    /// Attach the hashes observed on each side
    #[must_use]
    pub fn with_hashes(
        mut self,
        local: Option<ContentHash>,
        remote: Option<ContentHash>,
    ) -> Self {
        self.local_hash = local;
        self.remote_hash = remote;
        self
    }

    /// Attach the modification times observed on each side
    #[must_use]
    pub fn with_mtimes(
        mut self,
        local: Option<DateTime<Utc>>,
        remote: Option<DateTime<Utc>>,
    ) -> Self {
        self.local_mtime = local;
        self.remote_mtime = remote;
        self
    }

    /// Returns true if the record still needs a decision
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.resolution == Resolution::Unresolved
    }

    /// Settle the conflict and append to the decision log
    pub fn resolve(
        &mut self,
        resolution: Resolution,
        source: ResolutionSource,
        note: Option<String>,
    ) {
        let now = Utc::now();
        self.resolution = resolution;
        self.resolved_at = Some(now);
        self.resolved_by = Some(source);
        self.history.push(ConflictDecision {
            at: now,
            resolution,
            source,
            note,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
