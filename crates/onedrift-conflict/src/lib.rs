//! onedrift Conflict - conflict copy handling
//!
//! When both sides of a path diverge, the engine never discards local
//! bytes: it preserves them as a timestamped sibling (the "conflict
//! copy") before the remote version lands. This crate owns the naming
//! scheme, the preservation step, and the file-level application of an
//! operator's resolution. Durable records live in the state store; the
//! callers wire the two together.

pub mod namer;
pub mod resolver;

pub use namer::{conflict_copy_name, find_conflict_copies};
pub use resolver::{apply_resolution, preserve_local_copy, ResolutionOutcome};
