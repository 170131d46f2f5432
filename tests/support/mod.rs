//! Shared fakes for driving the remote store deterministically: scripted
//! collaborators plus hand-rolled streams whose callbacks the tests invoke
//! directly.

// Each integration test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docsync::error::{DocSyncError, DocSyncResult};
use docsync::local::LocalStore;
use docsync::model::{DocumentKey, Query, ResourcePath, SnapshotVersion, Timestamp};
use docsync::remote::{
    box_sync_future, BatchId, Datastore, Mutation, MutationBatch, MutationBatchResult,
    MutationResult, OnlineState, OnlineStateDelegate, QueryData, QueryPurpose, RemoteEvent,
    RemoteStore, SyncEngine, SyncFuture, TargetId, WatchChange, WatchStream, WatchStreamDelegate,
    WriteStream, WriteStreamDelegate,
};

pub fn version(seconds: i64) -> SnapshotVersion {
    SnapshotVersion::new(Timestamp::new(seconds, 0))
}

pub fn key(path: &str) -> DocumentKey {
    DocumentKey::from_string(path).unwrap()
}

pub fn collection_target(target_id: TargetId, path: &str) -> QueryData {
    let query = Query::at_path(ResourcePath::from_string(path).unwrap());
    QueryData::new(query, target_id, QueryPurpose::Listen)
}

pub fn document_target(target_id: TargetId, path: &str) -> QueryData {
    let query = Query::at_path(ResourcePath::from_string(path).unwrap());
    assert!(query.is_document_query());
    QueryData::new(query, target_id, QueryPurpose::Listen)
}

pub fn delete_batch(batch_id: BatchId, path: &str) -> MutationBatch {
    MutationBatch::new(
        batch_id,
        Timestamp::new(0, 0),
        vec![Mutation::Delete { key: key(path) }],
    )
}

// ---------------------------------------------------------------------------
// Collaborators

#[derive(Default)]
pub struct FakeLocalStore {
    pub batches: Mutex<Vec<MutationBatch>>,
    pub remote_keys: Mutex<BTreeMap<TargetId, BTreeSet<DocumentKey>>>,
    pub last_snapshot: Mutex<SnapshotVersion>,
    pub stream_token: Mutex<Option<Vec<u8>>>,
    /// Every token the remote store persisted, in order.
    pub token_writes: Mutex<Vec<Option<Vec<u8>>>>,
}

impl FakeLocalStore {
    pub fn set_batches(&self, batches: Vec<MutationBatch>) {
        *self.batches.lock().unwrap() = batches;
    }

    pub fn set_remote_keys(&self, target_id: TargetId, keys: BTreeSet<DocumentKey>) {
        self.remote_keys.lock().unwrap().insert(target_id, keys);
    }

    pub fn set_stream_token(&self, token: Option<Vec<u8>>) {
        *self.stream_token.lock().unwrap() = token;
    }
}

impl LocalStore for FakeLocalStore {
    fn next_mutation_batch_after(
        &self,
        batch_id: Option<BatchId>,
    ) -> SyncFuture<'_, DocSyncResult<Option<MutationBatch>>> {
        let next = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|batch| batch_id.map_or(true, |id| batch.batch_id > id))
            .min_by_key(|batch| batch.batch_id)
            .cloned();
        box_sync_future(async move { Ok(next) })
    }

    fn remote_document_keys(&self, target_id: TargetId) -> BTreeSet<DocumentKey> {
        self.remote_keys
            .lock()
            .unwrap()
            .get(&target_id)
            .cloned()
            .unwrap_or_default()
    }

    fn last_remote_snapshot_version(&self) -> SnapshotVersion {
        *self.last_snapshot.lock().unwrap()
    }

    fn last_stream_token(&self) -> Option<Vec<u8>> {
        self.stream_token.lock().unwrap().clone()
    }

    fn set_last_stream_token(&self, token: Option<Vec<u8>>) -> SyncFuture<'_, DocSyncResult<()>> {
        *self.stream_token.lock().unwrap() = token.clone();
        self.token_writes.lock().unwrap().push(token);
        box_sync_future(async { Ok(()) })
    }
}

#[derive(Default)]
pub struct FakeSyncEngine {
    pub events: Mutex<Vec<RemoteEvent>>,
    pub rejected_listens: Mutex<Vec<(TargetId, DocSyncError)>>,
    pub successful_writes: Mutex<Vec<MutationBatchResult>>,
    pub rejected_writes: Mutex<Vec<(BatchId, DocSyncError)>>,
}

impl FakeSyncEngine {
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn acked_batch_ids(&self) -> Vec<BatchId> {
        self.successful_writes
            .lock()
            .unwrap()
            .iter()
            .map(|result| result.batch_id())
            .collect()
    }
}

impl SyncEngine for FakeSyncEngine {
    fn apply_remote_event(&self, event: RemoteEvent) -> SyncFuture<'_, DocSyncResult<()>> {
        self.events.lock().unwrap().push(event);
        box_sync_future(async { Ok(()) })
    }

    fn reject_listen(
        &self,
        target_id: TargetId,
        error: DocSyncError,
    ) -> SyncFuture<'_, DocSyncResult<()>> {
        self.rejected_listens.lock().unwrap().push((target_id, error));
        box_sync_future(async { Ok(()) })
    }

    fn apply_successful_write(
        &self,
        result: MutationBatchResult,
    ) -> SyncFuture<'_, DocSyncResult<()>> {
        self.successful_writes.lock().unwrap().push(result);
        box_sync_future(async { Ok(()) })
    }

    fn reject_failed_write(
        &self,
        batch_id: BatchId,
        error: DocSyncError,
    ) -> SyncFuture<'_, DocSyncResult<()>> {
        self.rejected_writes.lock().unwrap().push((batch_id, error));
        box_sync_future(async { Ok(()) })
    }
}

#[derive(Default)]
pub struct RecordingOnlineDelegate {
    transitions: Mutex<Vec<OnlineState>>,
}

impl RecordingOnlineDelegate {
    pub fn transitions(&self) -> Vec<OnlineState> {
        self.transitions.lock().unwrap().clone()
    }
}

impl OnlineStateDelegate for RecordingOnlineDelegate {
    fn on_online_state_changed(&self, state: OnlineState) {
        self.transitions.lock().unwrap().push(state);
    }
}

// ---------------------------------------------------------------------------
// Streams

#[derive(Debug, Clone)]
pub enum WatchRequest {
    Watch(QueryData),
    Unwatch(TargetId),
}

#[derive(Default)]
pub struct FakeWatchStream {
    started: AtomicBool,
    open: AtomicBool,
    pub starts: AtomicUsize,
    pub idle_marks: AtomicUsize,
    requests: Mutex<Vec<WatchRequest>>,
    delegate: Mutex<Option<Arc<dyn WatchStreamDelegate>>>,
}

impl FakeWatchStream {
    pub fn requests(&self) -> Vec<WatchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn watched_targets(&self) -> Vec<QueryData> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                WatchRequest::Watch(data) => Some(data),
                WatchRequest::Unwatch(_) => None,
            })
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn delegate(&self) -> Arc<dyn WatchStreamDelegate> {
        self.delegate
            .lock()
            .unwrap()
            .clone()
            .expect("watch stream was never started")
    }

    /// Simulates the transport opening the connection.
    pub async fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.delegate().on_open().await.unwrap();
    }

    pub async fn deliver(&self, change: WatchChange, snapshot_version: SnapshotVersion) {
        self.delegate()
            .on_change(change, snapshot_version)
            .await
            .unwrap();
    }

    /// Simulates the session ending; the stream leaves the started state
    /// before the close callback fires, mirroring the production streams.
    pub async fn close(&self, error: Option<DocSyncError>) {
        self.open.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.delegate().on_close(error).await;
    }
}

#[async_trait]
impl WatchStream for FakeWatchStream {
    fn start(&self, delegate: Arc<dyn WatchStreamDelegate>) {
        assert!(!self.started.swap(true, Ordering::SeqCst));
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.delegate.lock().unwrap() = Some(delegate);
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.delegate.lock().unwrap().take();
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn mark_idle(&self) {
        self.idle_marks.fetch_add(1, Ordering::SeqCst);
    }

    async fn watch_query(&self, query: &QueryData) -> DocSyncResult<()> {
        self.requests
            .lock()
            .unwrap()
            .push(WatchRequest::Watch(query.clone()));
        Ok(())
    }

    async fn unwatch_target(&self, target_id: TargetId) -> DocSyncResult<()> {
        self.requests
            .lock()
            .unwrap()
            .push(WatchRequest::Unwatch(target_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWriteStream {
    started: AtomicBool,
    handshake_complete: AtomicBool,
    token: Mutex<Option<Vec<u8>>>,
    pub starts: AtomicUsize,
    pub handshakes: AtomicUsize,
    pub inhibits: AtomicUsize,
    pub idle_marks: AtomicUsize,
    writes: Mutex<Vec<Vec<Mutation>>>,
    delegate: Mutex<Option<Arc<dyn WriteStreamDelegate>>>,
}

impl FakeWriteStream {
    pub fn writes(&self) -> Vec<Vec<Mutation>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn delegate(&self) -> Arc<dyn WriteStreamDelegate> {
        self.delegate
            .lock()
            .unwrap()
            .clone()
            .expect("write stream was never started")
    }

    pub async fn open(&self) {
        self.delegate().on_open().await.unwrap();
    }

    /// Delivers the handshake response: token recorded before the callback,
    /// as the production stream does.
    pub async fn complete_handshake(&self, token: &[u8]) {
        *self.token.lock().unwrap() = Some(token.to_vec());
        self.handshake_complete.store(true, Ordering::SeqCst);
        self.delegate().on_handshake_complete().await.unwrap();
    }

    pub async fn ack(&self, commit_version: SnapshotVersion, results: Vec<MutationResult>) {
        self.delegate()
            .on_response(commit_version, results)
            .await
            .unwrap();
    }

    pub async fn close(&self, error: Option<DocSyncError>) {
        self.started.store(false, Ordering::SeqCst);
        self.delegate().on_close(error).await;
    }
}

#[async_trait]
impl WriteStream for FakeWriteStream {
    fn start(&self, delegate: Arc<dyn WriteStreamDelegate>) {
        assert!(!self.started.swap(true, Ordering::SeqCst));
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.handshake_complete.store(false, Ordering::SeqCst);
        *self.delegate.lock().unwrap() = Some(delegate);
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.delegate.lock().unwrap().take();
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::SeqCst)
    }

    fn last_stream_token(&self) -> Option<Vec<u8>> {
        self.token.lock().unwrap().clone()
    }

    fn set_last_stream_token(&self, token: Option<Vec<u8>>) {
        *self.token.lock().unwrap() = token;
    }

    fn mark_idle(&self) {
        self.idle_marks.fetch_add(1, Ordering::SeqCst);
    }

    fn inhibit_backoff(&self) {
        self.inhibits.fetch_add(1, Ordering::SeqCst);
    }

    async fn write_handshake(&self) -> DocSyncResult<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_mutations(&self, mutations: &[Mutation]) -> DocSyncResult<()> {
        self.writes.lock().unwrap().push(mutations.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDatastore {
    pub watch_streams: Mutex<Vec<Arc<FakeWatchStream>>>,
    pub write_streams: Mutex<Vec<Arc<FakeWriteStream>>>,
}

impl FakeDatastore {
    pub fn latest_watch(&self) -> Arc<FakeWatchStream> {
        self.watch_streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no watch stream created")
    }

    pub fn latest_write(&self) -> Arc<FakeWriteStream> {
        self.write_streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no write stream created")
    }

    pub fn watch_stream_count(&self) -> usize {
        self.watch_streams.lock().unwrap().len()
    }
}

#[async_trait]
impl Datastore for FakeDatastore {
    fn create_watch_stream(&self) -> Arc<dyn WatchStream> {
        let stream = Arc::new(FakeWatchStream::default());
        self.watch_streams.lock().unwrap().push(Arc::clone(&stream));
        stream
    }

    fn create_write_stream(&self) -> Arc<dyn WriteStream> {
        let stream = Arc::new(FakeWriteStream::default());
        self.write_streams.lock().unwrap().push(Arc::clone(&stream));
        stream
    }

    async fn commit(
        &self,
        mutations: Vec<Mutation>,
    ) -> DocSyncResult<(SnapshotVersion, Vec<MutationResult>)> {
        let results = mutations.iter().map(|_| MutationResult::default()).collect();
        Ok((SnapshotVersion::NONE, results))
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub store: RemoteStore,
    pub datastore: Arc<FakeDatastore>,
    pub local: Arc<FakeLocalStore>,
    pub sync: Arc<FakeSyncEngine>,
    pub online: Arc<RecordingOnlineDelegate>,
}

pub fn harness() -> Harness {
    let datastore = Arc::new(FakeDatastore::default());
    let local = Arc::new(FakeLocalStore::default());
    let sync = Arc::new(FakeSyncEngine::default());
    let online = Arc::new(RecordingOnlineDelegate::default());
    let store = RemoteStore::new(
        Arc::clone(&datastore) as Arc<dyn Datastore>,
        Arc::clone(&local) as Arc<dyn LocalStore>,
        Arc::clone(&sync) as Arc<dyn SyncEngine>,
        Some(Arc::clone(&online) as Arc<dyn OnlineStateDelegate>),
    );
    Harness {
        store,
        datastore,
        local,
        sync,
        online,
    }
}
