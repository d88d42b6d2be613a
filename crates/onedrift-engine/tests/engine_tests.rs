//! End-to-end engine tests against an in-memory fake remote
//!
//! The fake implements the full `RemoteClient` port over a mutex-guarded
//! tree, emitting one terminal delta page per enumeration. Each test
//! builds a real state store, session store, and sync root on disk and
//! drives whole cycles through the engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use onedrift_core::config::Config;
use onedrift_core::domain::{
    ConflictKind, DriveId, ItemId, ItemType, Resolution, ResolutionSource,
};
use onedrift_core::ports::{
    Change, ChunkAck, DeltaPage, RemoteClient, RemoteError, RemoteItem, RemoteUploadSession,
};
use onedrift_engine::{CycleOptions, EngineError, SyncEngine, SyncMode};
use onedrift_scan::hash_bytes;
use onedrift_state::{DiskSessionStore, StatePool, StateStore};

// ============================================================================
// Fake remote
// ============================================================================

#[derive(Debug, Clone)]
struct FakeItem {
    id: String,
    name: String,
    parent_id: Option<String>,
    is_folder: bool,
    is_root: bool,
    content: Vec<u8>,
    mtime: DateTime<Utc>,
}

#[derive(Debug)]
struct FakeSession {
    parent_id: String,
    name: String,
    data: Vec<u8>,
    total: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    items: BTreeMap<String, FakeItem>,
    deleted: BTreeSet<String>,
    sessions: HashMap<String, FakeSession>,
    next_id: u64,
    delta_serial: u64,
    /// Offsets of ranged download requests, for assertions
    range_requests: Vec<u64>,
    resume_calls: u32,
    /// `Some(n)`: allow n more upload chunks, then fail every chunk
    allow_chunks: Option<u32>,
}

struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    fn new() -> Arc<Self> {
        let mut state = FakeState::default();
        state.items.insert(
            "root".to_string(),
            FakeItem {
                id: "root".to_string(),
                name: String::new(),
                parent_id: None,
                is_folder: true,
                is_root: true,
                content: Vec::new(),
                mtime: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
        );
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    async fn add_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().await;
        let parent_id = ensure_folders(&mut state, path);
        let name = path.rsplit('/').next().unwrap().to_string();
        if let Some(existing) = find_child(&state, &parent_id, &name) {
            let item = state.items.get_mut(&existing).unwrap();
            item.content = content.to_vec();
            item.mtime = Utc::now();
        } else {
            let id = next_id(&mut state);
            state.items.insert(
                id.clone(),
                FakeItem {
                    id,
                    name,
                    parent_id: Some(parent_id),
                    is_folder: false,
                    is_root: false,
                    content: content.to_vec(),
                    mtime: Utc::now(),
                },
            );
        }
    }

    async fn delete_path(&self, path: &str) {
        let mut state = self.state.lock().await;
        let Some(id) = find_by_path(&state, path) else {
            return;
        };
        let mut doomed = vec![id];
        // Children go too.
        loop {
            let more: Vec<String> = state
                .items
                .values()
                .filter(|i| {
                    i.parent_id
                        .as_ref()
                        .is_some_and(|p| doomed.contains(p) && !doomed.contains(&i.id))
                })
                .map(|i| i.id.clone())
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }
        for id in doomed {
            state.items.remove(&id);
            state.deleted.insert(id);
        }
    }

    async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        let id = find_by_path(&state, path)?;
        state.items.get(&id).map(|i| i.content.clone())
    }

    async fn set_allow_chunks(&self, allow: Option<u32>) {
        self.state.lock().await.allow_chunks = allow;
    }

    async fn range_requests(&self) -> Vec<u64> {
        self.state.lock().await.range_requests.clone()
    }

    async fn resume_calls(&self) -> u32 {
        self.state.lock().await.resume_calls
    }
}

fn next_id(state: &mut FakeState) -> String {
    state.next_id += 1;
    format!("item-{:04}", state.next_id)
}

fn path_of(state: &FakeState, id: &str) -> String {
    let mut segments = Vec::new();
    let mut current = id.to_string();
    loop {
        let Some(item) = state.items.get(&current) else {
            return String::new();
        };
        if item.is_root {
            segments.reverse();
            return segments.join("/");
        }
        segments.push(item.name.clone());
        match &item.parent_id {
            Some(parent) => current = parent.clone(),
            None => return String::new(),
        }
    }
}

fn find_by_path(state: &FakeState, path: &str) -> Option<String> {
    state
        .items
        .values()
        .find(|i| !i.is_root && path_of(state, &i.id) == path)
        .map(|i| i.id.clone())
}

fn find_child(state: &FakeState, parent_id: &str, name: &str) -> Option<String> {
    state
        .items
        .values()
        .find(|i| i.parent_id.as_deref() == Some(parent_id) && i.name == name)
        .map(|i| i.id.clone())
}

fn ensure_folders(state: &mut FakeState, file_path: &str) -> String {
    let mut parent = "root".to_string();
    let segments: Vec<&str> = file_path.split('/').collect();
    for segment in &segments[..segments.len() - 1] {
        match find_child(state, &parent, segment) {
            Some(id) => parent = id,
            None => {
                let id = next_id(state);
                state.items.insert(
                    id.clone(),
                    FakeItem {
                        id: id.clone(),
                        name: segment.to_string(),
                        parent_id: Some(parent.clone()),
                        is_folder: true,
                        is_root: false,
                        content: Vec::new(),
                        mtime: Utc::now(),
                    },
                );
                parent = id;
            }
        }
    }
    parent
}

fn to_remote_item(state: &FakeState, item: &FakeItem) -> RemoteItem {
    RemoteItem {
        id: ItemId::new(item.id.clone()).unwrap(),
        name: item.name.clone(),
        parent_drive_id: item.parent_id.as_ref().map(|_| DriveId::new("abc")),
        parent_id: item
            .parent_id
            .as_ref()
            .map(|p| ItemId::new(p.clone()).unwrap()),
        item_type: if item.is_root {
            ItemType::Root
        } else if item.is_folder {
            ItemType::Folder
        } else {
            ItemType::File
        },
        size: (!item.is_folder).then(|| item.content.len() as u64),
        quick_xor_hash: (!item.is_folder)
            .then(|| hash_bytes(&item.content).as_str().to_string()),
        etag: None,
        created: None,
        modified: Some(item.mtime),
    }
}

#[async_trait::async_trait]
impl RemoteClient for FakeRemote {
    async fn delta_page(
        &self,
        _drive_id: &DriveId,
        _cursor: Option<&str>,
    ) -> Result<DeltaPage, RemoteError> {
        // Full enumeration, one terminal page. Root first, then by path
        // so parents precede children.
        let mut state = self.state.lock().await;
        state.delta_serial += 1;

        let mut live: Vec<&FakeItem> = state.items.values().collect();
        live.sort_by_key(|i| (!i.is_root, path_of(&state, &i.id)));

        let mut changes: Vec<Change> = live
            .iter()
            .map(|i| Change::Upsert(to_remote_item(&state, i)))
            .collect();
        changes.extend(
            state
                .deleted
                .iter()
                .map(|id| Change::Delete(ItemId::new(id.clone()).unwrap())),
        );

        Ok(DeltaPage {
            changes,
            next_token: None,
            terminal_token: Some(format!("delta-{}", state.delta_serial)),
        })
    }

    async fn get_item(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .get(item_id.as_str())
            .map(|i| to_remote_item(&state, i)))
    }

    async fn get_item_by_path(
        &self,
        _drive_id: &DriveId,
        path: &str,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        let state = self.state.lock().await;
        Ok(find_by_path(&state, path)
            .and_then(|id| state.items.get(&id).map(|i| to_remote_item(&state, i))))
    }

    async fn list_children(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.parent_id.as_deref() == Some(item_id.as_str()))
            .map(|i| to_remote_item(&state, i))
            .collect())
    }

    async fn create_folder(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = find_child(&state, parent_id.as_str(), name) {
            let item = state.items.get(&existing).unwrap().clone();
            return Ok(to_remote_item(&state, &item));
        }
        let id = next_id(&mut state);
        let item = FakeItem {
            id: id.clone(),
            name: name.to_string(),
            parent_id: Some(parent_id.as_str().to_string()),
            is_folder: true,
            is_root: false,
            content: Vec::new(),
            mtime: Utc::now(),
        };
        state.items.insert(id, item.clone());
        Ok(to_remote_item(&state, &item))
    }

    async fn move_item(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(item_id.as_str())
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                message: "no such item".to_string(),
            })?;
        item.parent_id = Some(new_parent_id.as_str().to_string());
        item.name = new_name.to_string();
        let item = item.clone();
        Ok(to_remote_item(&state, &item))
    }

    async fn delete_item(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.items.remove(item_id.as_str());
        state.deleted.insert(item_id.as_str().to_string());
        Ok(())
    }

    async fn download(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, RemoteError> {
        let content = {
            let state = self.state.lock().await;
            state
                .items
                .get(item_id.as_str())
                .ok_or_else(|| RemoteError::Http {
                    status: 404,
                    message: "no such item".to_string(),
                })?
                .content
                .clone()
        };
        writer.write_all(&content).await?;
        writer.flush().await?;
        Ok(content.len() as u64)
    }

    async fn download_range(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        offset: u64,
    ) -> Result<(u64, u64), RemoteError> {
        let content = {
            let mut state = self.state.lock().await;
            state.range_requests.push(offset);
            state
                .items
                .get(item_id.as_str())
                .ok_or_else(|| RemoteError::Http {
                    status: 404,
                    message: "no such item".to_string(),
                })?
                .content
                .clone()
        };
        let total = content.len() as u64;
        if offset > total {
            return Err(RemoteError::Validation("range beyond EOF".to_string()));
        }
        let suffix = &content[offset as usize..];
        writer.write_all(suffix).await?;
        writer.flush().await?;
        Ok((suffix.len() as u64, total))
    }

    async fn upload_small(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        content: Vec<u8>,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<RemoteItem, RemoteError> {
        let mut state = self.state.lock().await;
        let id = match find_child(&state, parent_id.as_str(), name) {
            Some(id) => id,
            None => {
                let id = next_id(&mut state);
                state.items.insert(
                    id.clone(),
                    FakeItem {
                        id: id.clone(),
                        name: name.to_string(),
                        parent_id: Some(parent_id.as_str().to_string()),
                        is_folder: false,
                        is_root: false,
                        content: Vec::new(),
                        mtime: Utc::now(),
                    },
                );
                id
            }
        };
        let item = state.items.get_mut(&id).unwrap();
        item.content = content;
        if let Some(mtime) = mtime {
            item.mtime = mtime;
        }
        let item = item.clone();
        state.deleted.remove(&id);
        Ok(to_remote_item(&state, &item))
    }

    async fn create_upload_session(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteUploadSession, RemoteError> {
        let mut state = self.state.lock().await;
        let url = format!("fake-session-{}", state.sessions.len() + 1);
        state.sessions.insert(
            url.clone(),
            FakeSession {
                parent_id: parent_id.as_str().to_string(),
                name: name.to_string(),
                data: Vec::new(),
                total: 0,
            },
        );
        Ok(RemoteUploadSession {
            url,
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn upload_chunk(
        &self,
        session_url: &str,
        chunk: Vec<u8>,
        offset: u64,
        total_size: u64,
    ) -> Result<ChunkAck, RemoteError> {
        let mut state = self.state.lock().await;

        match state.allow_chunks {
            Some(0) => {
                return Err(RemoteError::Network(
                    "connection lost mid-upload".to_string(),
                ))
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }

        let received = {
            let session = state
                .sessions
                .get_mut(session_url)
                .ok_or_else(|| RemoteError::SessionExpired("unknown session".to_string()))?;
            assert_eq!(
                offset,
                session.data.len() as u64,
                "fake session expects contiguous chunks"
            );
            session.data.extend_from_slice(&chunk);
            session.total = total_size;
            session.data.len() as u64
        };

        if received == total_size {
            let (parent_id, name, data) = {
                let s = state.sessions.remove(session_url).unwrap();
                (s.parent_id, s.name, s.data)
            };
            let id = next_id(&mut state);
            let item = FakeItem {
                id: id.clone(),
                name,
                parent_id: Some(parent_id),
                is_folder: false,
                is_root: false,
                content: data,
                mtime: Utc::now(),
            };
            state.items.insert(id, item.clone());
            let remote = to_remote_item(&state, &item);
            return Ok(ChunkAck {
                next_expected: None,
                item: Some(remote),
            });
        }

        Ok(ChunkAck {
            next_expected: Some(received),
            item: None,
        })
    }

    async fn resume_status(&self, session_url: &str) -> Result<u64, RemoteError> {
        let mut state = self.state.lock().await;
        state.resume_calls += 1;
        state
            .sessions
            .get(session_url)
            .map(|s| s.data.len() as u64)
            .ok_or_else(|| RemoteError::SessionExpired("unknown session".to_string()))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: SyncEngine,
    remote: Arc<FakeRemote>,
    store: Arc<StateStore>,
    sessions: Arc<DiskSessionStore>,
    root: std::path::PathBuf,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

async fn harness() -> Harness {
    let sync_root = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();

    let remote = FakeRemote::new();
    let pool = StatePool::in_memory().await.unwrap();
    let store = Arc::new(StateStore::new(&pool));
    let sessions = Arc::new(DiskSessionStore::open(data_dir.path()).unwrap());

    let mut config = Config::default();
    config.sync.root = sync_root.path().to_path_buf();

    let engine = SyncEngine::new(
        DriveId::new("abc"),
        remote.clone(),
        store.clone(),
        sessions.clone(),
        sync_root.path(),
        config,
        CancellationToken::new(),
    );

    Harness {
        engine,
        remote,
        store,
        sessions,
        root: sync_root.path().to_path_buf(),
        _dirs: (sync_root, data_dir),
    }
}

fn opts(mode: SyncMode) -> CycleOptions {
    CycleOptions {
        mode,
        dry_run: false,
        force: false,
    }
}

fn write_local(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn upload_only_baseline_creates_folder_and_file() {
    let h = harness().await;
    write_local(&h.root, "F/a.txt", b"hello\n");

    let report = h.engine.run_cycle(&opts(SyncMode::UploadOnly)).await.unwrap();

    assert_eq!(report.folders_created, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.bytes_uploaded, 6);
    assert!(report.errors.is_empty());

    assert_eq!(h.remote.read_file("F/a.txt").await.unwrap(), b"hello\n");

    let drive = DriveId::new("abc");
    let rows = h.store.list_all_active_items(&drive).await.unwrap();
    // Folder + file (the root row is excluded from the active listing).
    assert_eq!(rows.len(), 2);

    let verify = h.engine.verify().await.unwrap();
    assert!(verify.is_clean());
    assert_eq!(verify.checked, 1);
}

#[tokio::test]
async fn second_cycle_over_converged_state_is_a_noop() {
    let h = harness().await;
    write_local(&h.root, "F/a.txt", b"hello\n");
    h.engine.run_cycle(&opts(SyncMode::UploadOnly)).await.unwrap();

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert!(report.is_noop(), "expected no actions: {report:?}");
    assert_eq!(report.synced_updates, 0);
}

#[tokio::test]
async fn convergent_create_transfers_no_bytes() {
    let h = harness().await;
    write_local(&h.root, "x.txt", b"final");
    h.remote.add_file("x.txt", b"final").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();

    assert_eq!(report.downloaded, 0);
    assert_eq!(report.uploaded, 0);
    assert!(report.synced_updates >= 1);

    // Both sides still read the same content.
    assert_eq!(std::fs::read(h.root.join("x.txt")).unwrap(), b"final");
    assert_eq!(h.remote.read_file("x.txt").await.unwrap(), b"final");
}

#[tokio::test]
async fn convergent_edit_after_baseline_is_metadata_only() {
    let h = harness().await;
    write_local(&h.root, "x.txt", b"v1");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    // Both sides independently reach the same new content.
    write_local(&h.root, "x.txt", b"final-content");
    h.remote.add_file("x.txt", b"final-content").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.downloaded, 0);
    assert_eq!(report.uploaded, 0);
    assert!(report.synced_updates >= 1);
}

#[tokio::test]
async fn edit_edit_conflict_preserves_local_bytes() {
    let h = harness().await;
    write_local(&h.root, "x.txt", b"v1");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    write_local(&h.root, "x.txt", b"L");
    h.remote.add_file("x.txt", b"R").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.conflicts, 1);

    // The original path now carries the remote version.
    assert_eq!(std::fs::read(h.root.join("x.txt")).unwrap(), b"R");

    // A sibling conflict copy carries the local version.
    let copies = onedrift_conflict::find_conflict_copies(&h.root.join("x.txt"));
    assert_eq!(copies.len(), 1);
    assert_eq!(std::fs::read(&copies[0]).unwrap(), b"L");

    // One unresolved edit_edit record.
    let open = h.store.list_unresolved_conflicts().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, ConflictKind::EditEdit);
    assert_eq!(open[0].path, "x.txt");
}

#[tokio::test]
async fn resolving_edit_edit_keep_remote_clears_the_conflict() {
    let h = harness().await;
    write_local(&h.root, "x.txt", b"v1");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();
    write_local(&h.root, "x.txt", b"L");
    h.remote.add_file("x.txt", b"R").await;
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    // What the CLI's `resolve x.txt --keep-remote` does:
    let mut record = h
        .store
        .find_unresolved_conflict(&DriveId::new("abc"), "x.txt")
        .await
        .unwrap()
        .unwrap();
    onedrift_conflict::apply_resolution(&h.root.join("x.txt"), Resolution::KeepRemote)
        .await
        .unwrap();
    record.resolve(Resolution::KeepRemote, ResolutionSource::User, None);
    h.store.save_conflict(&record).await.unwrap();

    assert!(h.store.list_unresolved_conflicts().await.unwrap().is_empty());
    assert!(onedrift_conflict::find_conflict_copies(&h.root.join("x.txt")).is_empty());

    let verify = h.engine.verify().await.unwrap();
    assert!(verify.is_clean(), "verify failed: {verify:?}");
}

#[tokio::test]
async fn remote_delete_of_locally_edited_file_reuploads() {
    let h = harness().await;
    write_local(&h.root, "y.txt", b"precious");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    write_local(&h.root, "y.txt", b"precious+");
    h.remote.delete_path("y.txt").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.uploaded, 1);
    assert!(report.errors.is_empty());

    // The file came back remotely with the local content.
    assert_eq!(h.remote.read_file("y.txt").await.unwrap(), b"precious+");

    // No unresolved conflicts, but the history shows the auto-decision.
    assert!(h.store.list_unresolved_conflicts().await.unwrap().is_empty());
    let all = h.store.list_all_conflicts().await.unwrap();
    let record = all.iter().find(|c| c.path == "y.txt").unwrap();
    assert_eq!(record.kind, ConflictKind::EditDelete);
    assert_eq!(record.resolution, Resolution::KeepLocal);
    assert_eq!(record.resolved_by, Some(ResolutionSource::Auto));
    assert_eq!(record.history.len(), 1);
}

#[tokio::test]
async fn untouched_local_file_follows_remote_delete() {
    let h = harness().await;
    write_local(&h.root, "old.txt", b"bye");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    h.remote.delete_path("old.txt").await;
    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();

    assert_eq!(report.local_deleted, 1);
    assert!(!h.root.join("old.txt").exists());
}

#[tokio::test]
async fn big_delete_gate_blocks_then_force_proceeds() {
    let h = harness().await;
    for i in 0..12 {
        write_local(&h.root, &format!("keep/f{i:02}.txt"), b"data");
    }
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    for i in 0..12 {
        h.remote.delete_path(&format!("keep/f{i:02}.txt")).await;
    }

    // Without force the gate trips and nothing is touched.
    let err = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BigDelete { .. }));
    assert!(err.to_string().contains("big-delete"));
    for i in 0..12 {
        assert!(h.root.join(format!("keep/f{i:02}.txt")).exists());
    }

    // With force the deletes proceed.
    let mut forced = opts(SyncMode::Bidirectional);
    forced.force = true;
    let report = h.engine.run_cycle(&forced).await.unwrap();
    assert_eq!(report.local_deleted, 12);
    for i in 0..12 {
        assert!(!h.root.join(format!("keep/f{i:02}.txt")).exists());
    }

    // And the next cycle settles with no changes.
    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert!(report.is_noop(), "expected settled state: {report:?}");
}

#[tokio::test]
async fn new_remote_file_downloads() {
    let h = harness().await;
    h.remote.add_file("docs/report.txt", b"from the cloud").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.folders_created, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(
        std::fs::read(h.root.join("docs/report.txt")).unwrap(),
        b"from the cloud"
    );

    let verify = h.engine.verify().await.unwrap();
    assert!(verify.is_clean());
}

#[tokio::test]
async fn download_only_mode_never_uploads() {
    let h = harness().await;
    write_local(&h.root, "local-only.txt", b"stays here");
    h.remote.add_file("remote-only.txt", b"comes down").await;

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::DownloadOnly))
        .await
        .unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.uploaded, 0);
    assert!(h.remote.read_file("local-only.txt").await.is_none());
}

#[tokio::test]
async fn remote_rename_moves_the_local_file() {
    let h = harness().await;
    write_local(&h.root, "dir/old-name.txt", b"contents");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    // Rename remotely via the port, as another client would.
    let drive = DriveId::new("abc");
    let item = h
        .store
        .get_item_by_path(&drive, "dir/old-name.txt")
        .await
        .unwrap()
        .unwrap();
    let parent = h.store.get_item_by_path(&drive, "dir").await.unwrap().unwrap();
    h.remote
        .move_item(&drive, &item.item_id, &parent.item_id, "new-name.txt")
        .await
        .unwrap();

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.moved, 1);
    assert_eq!(report.downloaded, 0, "a move must not re-download");
    assert!(!h.root.join("dir/old-name.txt").exists());
    assert_eq!(
        std::fs::read(h.root.join("dir/new-name.txt")).unwrap(),
        b"contents"
    );
}

#[tokio::test]
async fn local_rename_moves_the_remote_item() {
    let h = harness().await;
    write_local(&h.root, "dir/first.txt", b"identical bytes");
    h.engine.run_cycle(&opts(SyncMode::Bidirectional)).await.unwrap();

    // Rename locally.
    std::fs::rename(
        h.root.join("dir/first.txt"),
        h.root.join("dir/second.txt"),
    )
    .unwrap();

    let report = h
        .engine
        .run_cycle(&opts(SyncMode::Bidirectional))
        .await
        .unwrap();
    assert_eq!(report.moved, 1);
    assert_eq!(report.uploaded, 0, "a rename must not re-upload");
    assert!(h.remote.read_file("dir/first.txt").await.is_none());
    assert_eq!(
        h.remote.read_file("dir/second.txt").await.unwrap(),
        b"identical bytes"
    );
}

// ============================================================================
// Transfer-level scenarios
// ============================================================================

#[tokio::test]
async fn partial_download_resumes_with_a_range_request() {
    use onedrift_engine::transfer::{DownloadOptions, TransferManager};

    let h = harness().await;
    let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    h.remote.add_file("big.bin", &content).await;

    // A previous run left the first 40,000 bytes in a partial.
    let target = h.root.join("big.bin");
    std::fs::write(h.root.join("big.bin.partial"), &content[..40_000]).unwrap();

    let state = h.remote.state.lock().await;
    let item_id = find_by_path(&state, "big.bin").unwrap();
    drop(state);

    let transfers = TransferManager::new(
        h.remote.clone(),
        h.sessions.clone(),
        onedrift_core::config::TransferConfig::default(),
        CancellationToken::new(),
    );
    let result = transfers
        .download_to_file(
            &DriveId::new("abc"),
            &ItemId::new(item_id).unwrap(),
            &target,
            &DownloadOptions {
                expected_hash: Some(hash_bytes(&content)),
                expected_size: Some(content.len() as u64),
                mtime: None,
            },
        )
        .await
        .unwrap();

    assert!(result.hash_verified);
    assert_eq!(result.hash, hash_bytes(&content));
    assert_eq!(std::fs::read(&target).unwrap(), content);
    assert!(!h.root.join("big.bin.partial").exists());
    // The request picked up exactly where the partial stopped.
    assert_eq!(h.remote.range_requests().await, vec![40_000]);
}

#[tokio::test]
async fn interrupted_session_upload_resumes_after_restart() {
    use onedrift_engine::transfer::TransferManager;

    let h = harness().await;
    let drive = DriveId::new("abc");

    // 5 MiB + 1 byte, above the simple-upload threshold.
    let content: Vec<u8> = (0..(5 * 1024 * 1024 + 1) as u32)
        .map(|i| (i % 249) as u8)
        .collect();
    write_local(&h.root, "huge.bin", &content);
    let local_path = h.root.join("huge.bin");

    let transfers = TransferManager::new(
        h.remote.clone(),
        h.sessions.clone(),
        onedrift_core::config::TransferConfig {
            // Small chunks so the failure lands mid-file.
            upload_chunk_size: 1280 * 1024,
            ..Default::default()
        },
        CancellationToken::new(),
    );

    // First run dies after one acknowledged chunk.
    h.remote.set_allow_chunks(Some(1)).await;
    let err = transfers
        .upload_file(
            &drive,
            &ItemId::new("root").unwrap(),
            "huge.bin",
            &local_path,
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection lost"));

    // The session record survived the crash.
    let key = onedrift_core::domain::session_key(
        &drive,
        &local_path.to_string_lossy(),
    );
    assert!(h.sessions.get(&key).unwrap().is_some());

    // Restart: the upload resumes and completes.
    h.remote.set_allow_chunks(None).await;
    let result = transfers
        .upload_file(
            &drive,
            &ItemId::new("root").unwrap(),
            "huge.bin",
            &local_path,
            None,
        )
        .await
        .unwrap();

    assert!(h.remote.resume_calls().await >= 1, "expected a resume query");
    assert!(result.hash_verified);
    assert_eq!(
        h.remote.read_file("huge.bin").await.unwrap(),
        content,
        "remote content must match local content"
    );
    // Completed uploads leave no session record behind.
    assert!(h.sessions.get(&key).unwrap().is_none());
}
