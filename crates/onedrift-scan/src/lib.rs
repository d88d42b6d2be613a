//! onedrift Scan - Local tree observation
//!
//! Walks the sync root and reports what actually exists on disk:
//! - NFC-normalized, slash-separated relative paths
//! - skip filters (dotfiles, globs, size cap, conflict copies, partials)
//! - remote-compatible filename validation
//! - lazy, constant-memory quickXorHash computation

pub mod filter;
pub mod hash;
pub mod walker;

pub use filter::{FilterDecision, SkipFilter, validate_remote_name};
pub use hash::{QuickXorHasher, hash_bytes, hash_file};
pub use walker::{LocalEntry, LocalEntryKind, LocalScanner, ScanOutcome};
