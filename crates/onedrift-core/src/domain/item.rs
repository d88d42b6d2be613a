//! Baseline item entity
//!
//! An [`Item`] is one row of the persisted baseline: the engine's record of
//! what it last reconciled for a path on a drive. Items are keyed by
//! `(DriveId, ItemId)` and carry a materialized path that is derived from
//! the name + parent chain (the chain is authoritative, the path is not).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drive::{DriveId, ItemId, ItemKey};
use super::errors::DomainError;

// ============================================================================
// ItemType
// ============================================================================

/// The closed set of item kinds tracked in the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
    /// The drive root itself (exactly one per drive)
    Root,
}

impl ItemType {
    /// The persisted spelling of this item type
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
            ItemType::Root => "root",
        }
    }

    /// Returns true for folders and the root
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, ItemType::Folder | ItemType::Root)
    }
}

impl Display for ItemType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ItemType::File),
            "folder" => Ok(ItemType::Folder),
            "root" => Ok(ItemType::Root),
            other => Err(DomainError::InvalidItemType(other.to_string())),
        }
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// A quickXorHash value in Base64 form (20 bytes decoded)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Decoded length of a quickXorHash (20 bytes)
    const EXPECTED_DECODED_LEN: usize = 20;

    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns an error if the value is not Base64 of the expected length.
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("hash cannot be empty".to_string()));
        }
        if !hash
            .chars()
            .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
        {
            return Err(DomainError::InvalidHash(format!(
                "hash is not valid Base64: {hash}"
            )));
        }
        let padding = hash.chars().rev().take_while(|&c| c == '=').count();
        let decoded_len = (hash.len() * 3 / 4) - padding;
        if decoded_len != Self::EXPECTED_DECODED_LEN {
            return Err(DomainError::InvalidHash(format!(
                "hash decodes to {} bytes, expected {}",
                decoded_len,
                Self::EXPECTED_DECODED_LEN
            )));
        }
        Ok(Self(hash))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// DeltaCursor
// ============================================================================

/// An opaque delta cursor plus a completeness marker
///
/// `is_complete` is true once a terminal page of a full enumeration has
/// been observed; from then on the cursor identifies an incremental
/// position rather than a mid-enumeration page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCursor {
    pub token: String,
    pub is_complete: bool,
}

impl DeltaCursor {
    /// Create a cursor for a mid-enumeration page
    #[must_use]
    pub fn page(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            is_complete: false,
        }
    }

    /// Create a cursor for a completed enumeration
    #[must_use]
    pub fn complete(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            is_complete: true,
        }
    }
}

// ============================================================================
// Item
// ============================================================================

/// One baseline row: a file, folder, or root as last reconciled
///
/// Invariants maintained by the store:
/// - non-root items reference a parent by `(parent_drive_id, parent_id)`;
///   a broken chain makes the item an orphan and its path materializes
///   to the empty string
/// - `path` is derived; name + parent chain is authoritative
/// - `is_deleted == true` implies `deleted_at` is set (tombstone)
/// - `(drive_id, path)` is unique over non-deleted items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub drive_id: DriveId,
    pub item_id: ItemId,
    pub parent_drive_id: Option<DriveId>,
    pub parent_id: Option<ItemId>,
    pub name: String,
    /// Materialized path, POSIX slash-separated, NFC, no leading slash
    pub path: String,
    pub item_type: ItemType,
    pub size: u64,
    pub quick_xor_hash: Option<ContentHash>,
    pub etag: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Hash at the last point both sides were known converged (files)
    pub synced_hash: Option<ContentHash>,
    /// When this item was last reconciled; unset means never synced.
    /// Folders have no hash, so this is their only baseline marker.
    pub synced_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Create a minimal file item
    #[must_use]
    pub fn file(
        drive_id: DriveId,
        item_id: ItemId,
        parent_id: ItemId,
        name: impl Into<String>,
        size: u64,
        hash: Option<ContentHash>,
    ) -> Self {
        let parent_drive = drive_id.clone();
        Self {
            drive_id,
            item_id,
            parent_drive_id: Some(parent_drive),
            parent_id: Some(parent_id),
            name: name.into(),
            path: String::new(),
            item_type: ItemType::File,
            size,
            quick_xor_hash: hash,
            etag: None,
            created_at: None,
            updated_at: None,
            is_deleted: false,
            deleted_at: None,
            synced_hash: None,
            synced_at: None,
        }
    }

    /// Create a minimal folder item
    #[must_use]
    pub fn folder(
        drive_id: DriveId,
        item_id: ItemId,
        parent_id: ItemId,
        name: impl Into<String>,
    ) -> Self {
        let parent_drive = drive_id.clone();
        Self {
            drive_id,
            item_id,
            parent_drive_id: Some(parent_drive),
            parent_id: Some(parent_id),
            name: name.into(),
            path: String::new(),
            item_type: ItemType::Folder,
            size: 0,
            quick_xor_hash: None,
            etag: None,
            created_at: None,
            updated_at: None,
            is_deleted: false,
            deleted_at: None,
            synced_hash: None,
            synced_at: None,
        }
    }

    /// Create the root item for a drive
    #[must_use]
    pub fn root(drive_id: DriveId, item_id: ItemId) -> Self {
        Self {
            drive_id,
            item_id,
            parent_drive_id: None,
            parent_id: None,
            name: String::new(),
            path: String::new(),
            item_type: ItemType::Root,
            size: 0,
            quick_xor_hash: None,
            etag: None,
            created_at: None,
            updated_at: None,
            is_deleted: false,
            deleted_at: None,
            synced_hash: None,
            synced_at: None,
        }
    }

    /// The primary key of this item
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.drive_id.clone(), self.item_id.clone())
    }

    /// The parent key, when the item has one
    #[must_use]
    pub fn parent_key(&self) -> Option<ItemKey> {
        match (&self.parent_drive_id, &self.parent_id) {
            (Some(d), Some(i)) => Some(ItemKey::new(d.clone(), i.clone())),
            _ => None,
        }
    }

    /// Returns true if this row is a tombstone
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.is_deleted
    }

    /// Mark this item deleted at the given time
    pub fn mark_deleted(&mut self, when: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(when);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    mod item_type_tests {
        use super::*;

        #[test]
        fn test_roundtrip() {
            for t in [ItemType::File, ItemType::Folder, ItemType::Root] {
                assert_eq!(t.as_str().parse::<ItemType>().unwrap(), t);
            }
        }

        #[test]
        fn test_unknown_rejected() {
            assert!("symlink".parse::<ItemType>().is_err());
        }

        #[test]
        fn test_is_container() {
            assert!(ItemType::Folder.is_container());
            assert!(ItemType::Root.is_container());
            assert!(!ItemType::File.is_container());
        }
    }

    mod content_hash_tests {
        use super::*;

        #[test]
        fn test_valid_hash() {
            let hash = ContentHash::new(HASH_A).unwrap();
            assert_eq!(hash.as_str(), HASH_A);
        }

        #[test]
        fn test_empty_fails() {
            assert!(ContentHash::new("").is_err());
        }

        #[test]
        fn test_wrong_length_fails() {
            assert!(ContentHash::new("AAAA").is_err());
        }

        #[test]
        fn test_invalid_base64_fails() {
            assert!(ContentHash::new("not@valid#base64!!!!!!!!!!!!").is_err());
        }
    }

    mod item_tests {
        use super::*;
        use crate::domain::drive::DriveId;

        fn drive() -> DriveId {
            DriveId::new("abc")
        }

        #[test]
        fn test_file_constructor() {
            let item = Item::file(
                drive(),
                ItemId::new("F1").unwrap(),
                ItemId::new("ROOT").unwrap(),
                "a.txt",
                6,
                Some(ContentHash::new(HASH_A).unwrap()),
            );
            assert_eq!(item.item_type, ItemType::File);
            assert_eq!(item.size, 6);
            assert!(!item.is_tombstone());
            assert_eq!(
                item.parent_key().unwrap(),
                ItemKey::new(drive(), ItemId::new("ROOT").unwrap())
            );
        }

        #[test]
        fn test_root_has_no_parent() {
            let root = Item::root(drive(), ItemId::new("ROOT").unwrap());
            assert!(root.parent_key().is_none());
            assert_eq!(root.item_type, ItemType::Root);
        }

        #[test]
        fn test_mark_deleted_sets_tombstone_fields() {
            let mut item = Item::folder(
                drive(),
                ItemId::new("D1").unwrap(),
                ItemId::new("ROOT").unwrap(),
                "docs",
            );
            let when = Utc::now();
            item.mark_deleted(when);
            assert!(item.is_tombstone());
            assert_eq!(item.deleted_at, Some(when));
        }
    }
}
