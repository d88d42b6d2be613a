//! Port definitions (trait interfaces implemented by adapter crates)

pub mod remote_client;

pub use remote_client::{
    Change, ChunkAck, DeltaPage, ErrorClass, RemoteClient, RemoteError, RemoteItem,
    RemoteUploadSession, classify_status,
};
