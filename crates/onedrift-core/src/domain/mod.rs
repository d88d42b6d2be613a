//! Domain model for the synchronization engine
//!
//! Everything in here is pure data plus validation: drive identity,
//! baseline items, conflict records, and upload-session records. No I/O.

pub mod conflict;
pub mod drive;
pub mod errors;
pub mod item;
pub mod session;
pub mod stale;

pub use conflict::{ConflictDecision, ConflictKind, ConflictRecord, Resolution, ResolutionSource};
pub use drive::{CanonicalDriveId, DriveId, DriveType, Email, ItemId, ItemKey};
pub use errors::DomainError;
pub use item::{ContentHash, DeltaCursor, Item, ItemType};
pub use session::{session_key, UploadSessionRecord};
pub use stale::StaleRecord;
