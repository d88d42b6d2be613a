//! onedrift Core - Domain logic and business rules
//!
//! This crate contains the engine-agnostic core with:
//! - **Drive identity** - `DriveId`, `CanonicalDriveId`, `ItemKey`
//! - **Domain entities** - `Item`, `ConflictRecord`, `UploadSessionRecord`, `StaleRecord`
//! - **Port definitions** - The `RemoteClient` capability the engine consumes
//! - **Error taxonomy** - `ErrorClass` (fatal / retryable / skippable)
//!
//! # Architecture
//!
//! The domain module contains pure data and validation logic with no I/O.
//! Ports define trait interfaces that adapter crates implement. The sync
//! engine orchestrates everything through the port interfaces, so the core
//! never depends on HTTP, SQLite, or the local filesystem.

pub mod config;
pub mod domain;
pub mod ports;
