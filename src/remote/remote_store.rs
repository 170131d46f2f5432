use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use async_lock::Mutex;
use async_trait::async_trait;

use crate::error::{DocSyncError, DocSyncResult};
use crate::local::LocalStore;
use crate::model::{DocumentKey, MaybeDocument, NoDocument, SnapshotVersion, Timestamp, User};
use crate::remote::datastore::Datastore;
use crate::remote::mutation::{BatchId, Mutation, MutationBatch, MutationBatchResult, MutationResult};
use crate::remote::online_state::{OnlineState, OnlineStateDelegate, OnlineStateTracker};
use crate::remote::query_data::{QueryData, QueryPurpose, TargetId};
use crate::remote::remote_event::RemoteEvent;
use crate::remote::streams::{WatchStream, WatchStreamDelegate, WriteStream, WriteStreamDelegate};
use crate::remote::sync_engine::SyncEngine;
use crate::remote::transaction::Transaction;
use crate::remote::watch_change::{
    ExistenceFilter, TargetChangeState, WatchChange, WatchTargetChange,
};
use crate::remote::watch_change_aggregator::{Aggregation, WatchChangeAggregator};

/// Upper bound on unacknowledged mutation batches in flight.
const MAX_PENDING_WRITES: usize = 10;

struct RemoteStoreState {
    listen_targets: BTreeMap<TargetId, QueryData>,
    pending_target_responses: BTreeMap<TargetId, u32>,
    accumulated_changes: Vec<WatchChange>,
    watch_stream: Option<Arc<dyn WatchStream>>,
    write_stream: Option<Arc<dyn WriteStream>>,
    write_pipeline: VecDeque<MutationBatch>,
    last_batch_seen: Option<BatchId>,
    write_stream_open_time: Option<Timestamp>,
}

impl Default for RemoteStoreState {
    fn default() -> Self {
        Self {
            listen_targets: BTreeMap::new(),
            pending_target_responses: BTreeMap::new(),
            accumulated_changes: Vec::new(),
            watch_stream: None,
            write_stream: None,
            write_pipeline: VecDeque::new(),
            last_batch_seen: None,
            write_stream_open_time: None,
        }
    }
}

impl RemoteStoreState {
    /// Stream handles exist exactly between `enable_network` and
    /// `disable_network`; both are created and dropped together.
    fn network_enabled(&self) -> bool {
        self.watch_stream.is_some()
    }

    fn should_start_watch_stream(&self) -> bool {
        match &self.watch_stream {
            Some(stream) => !stream.is_started() && !self.listen_targets.is_empty(),
            None => false,
        }
    }

    fn should_start_write_stream(&self) -> bool {
        match &self.write_stream {
            Some(stream) => !stream.is_started() && !self.write_pipeline.is_empty(),
            None => false,
        }
    }

    fn can_write_mutations(&self) -> bool {
        self.network_enabled() && self.write_pipeline.len() < MAX_PENDING_WRITES
    }

    /// Every watch/unwatch request records an expected response before it is
    /// emitted on the wire.
    fn record_pending_response(&mut self, target_id: TargetId) {
        *self.pending_target_responses.entry(target_id).or_insert(0) += 1;
    }

    /// The backend resends everything after a reconnect, so buffered changes
    /// and outstanding acknowledgements are void once the stream drops.
    fn clear_watch_state(&mut self) {
        self.accumulated_changes.clear();
        self.pending_target_responses.clear();
    }
}

/// Coordinates the watch and write streams against the local store and the
/// sync engine.
///
/// All methods run on the host's serial executor; the remote store spawns no
/// work of its own beyond what the streams do internally.
#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteStoreInner>,
}

impl RemoteStore {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        local_store: Arc<dyn LocalStore>,
        sync_engine: Arc<dyn SyncEngine>,
        online_delegate: Option<Arc<dyn OnlineStateDelegate>>,
    ) -> Self {
        let inner = Arc::new(RemoteStoreInner {
            datastore,
            local_store,
            sync_engine,
            state: Mutex::new(RemoteStoreState::default()),
            online_state: Mutex::new(OnlineStateTracker::new(online_delegate)),
        });
        Self { inner }
    }

    /// Brings the remote store online; equivalent to `enable_network`.
    pub async fn start(&self) -> DocSyncResult<()> {
        self.inner.enable_network().await
    }

    pub async fn enable_network(&self) -> DocSyncResult<()> {
        self.inner.enable_network().await
    }

    pub async fn disable_network(&self) -> DocSyncResult<()> {
        self.inner.disable_network().await
    }

    /// Permanently stops the remote store. The online-state delegate is
    /// detached before the final transition, so it observes nothing further.
    pub async fn shutdown(&self) -> DocSyncResult<()> {
        self.inner.shutdown().await
    }

    /// Tears down and recreates both streams so all queued state belonging
    /// to the previous user is discarded.
    pub async fn user_changed(&self, user: User) -> DocSyncResult<()> {
        self.inner.user_changed(user).await
    }

    /// Registers a listen target. The target id must not be active.
    pub async fn listen(&self, query: QueryData) -> DocSyncResult<()> {
        self.inner.listen(query).await
    }

    /// Removes an active listen target. The target id must be active.
    pub async fn unlisten(&self, target_id: TargetId) -> DocSyncResult<()> {
        self.inner.unlisten(target_id).await
    }

    /// Pulls mutation batches from the local store into the bounded write
    /// pipeline and pushes them onto the stream.
    pub async fn fill_write_pipeline(&self) -> DocSyncResult<()> {
        self.inner.fill_write_pipeline().await
    }

    pub async fn online_state(&self) -> OnlineState {
        self.inner.online_state.lock().await.state()
    }

    pub async fn is_network_enabled(&self) -> bool {
        self.inner.state.lock().await.network_enabled()
    }

    /// A new transaction bound to the underlying datastore. Transactions run
    /// outside the streams.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.inner.datastore))
    }
}

struct RemoteStoreInner {
    datastore: Arc<dyn Datastore>,
    local_store: Arc<dyn LocalStore>,
    sync_engine: Arc<dyn SyncEngine>,
    state: Mutex<RemoteStoreState>,
    online_state: Mutex<OnlineStateTracker>,
}

impl RemoteStoreInner {
    async fn enable_network(self: &Arc<Self>) -> DocSyncResult<()> {
        {
            let mut state = self.state.lock().await;
            assert!(
                !state.network_enabled(),
                "enable_network while the network is already enabled"
            );
            let watch_stream = self.datastore.create_watch_stream();
            let write_stream = self.datastore.create_write_stream();
            write_stream.set_last_stream_token(self.local_store.last_stream_token());
            state.watch_stream = Some(watch_stream);
            state.write_stream = Some(write_stream);
        }
        self.start_watch_stream().await;
        self.fill_write_pipeline().await?;
        self.online_state.lock().await.set_unknown();
        Ok(())
    }

    async fn disable_network(self: &Arc<Self>) -> DocSyncResult<()> {
        {
            let state = self.state.lock().await;
            if !state.network_enabled() {
                return Ok(());
            }
        }
        // The Failed transition is visible before the streams stop.
        self.online_state.lock().await.set_failed();

        let (watch_stream, write_stream) = {
            let mut state = self.state.lock().await;
            let watch_stream = state.watch_stream.take();
            let write_stream = state.write_stream.take();
            state.clear_watch_state();
            state.write_pipeline.clear();
            state.last_batch_seen = None;
            state.write_stream_open_time = None;
            (watch_stream, write_stream)
        };
        if let Some(stream) = watch_stream {
            stream.stop().await;
        }
        if let Some(stream) = write_stream {
            stream.stop().await;
        }
        Ok(())
    }

    async fn shutdown(self: &Arc<Self>) -> DocSyncResult<()> {
        {
            let mut tracker = self.online_state.lock().await;
            tracker.detach_delegate();
            tracker.set_failed();
        }
        self.disable_network().await
    }

    async fn user_changed(self: &Arc<Self>, user: User) -> DocSyncResult<()> {
        log::debug!("user changed to {:?}; recycling streams", user.uid());
        self.disable_network().await?;
        self.enable_network().await?;
        Ok(())
    }

    async fn listen(self: &Arc<Self>, query: QueryData) -> DocSyncResult<()> {
        let target_id = query.target_id();
        let (start_stream, send_on) = {
            let mut state = self.state.lock().await;
            assert!(
                !state.listen_targets.contains_key(&target_id),
                "listen called twice for target {target_id}"
            );
            state.listen_targets.insert(target_id, query.clone());
            if state.should_start_watch_stream() {
                (true, None)
            } else {
                let stream = state.watch_stream.clone().filter(|s| s.is_open());
                if stream.is_some() {
                    state.record_pending_response(target_id);
                }
                (false, stream)
            }
        };

        if start_stream {
            self.start_watch_stream().await;
        } else if let Some(stream) = send_on {
            stream.watch_query(&query).await?;
        }
        Ok(())
    }

    async fn unlisten(self: &Arc<Self>, target_id: TargetId) -> DocSyncResult<()> {
        let (send_on, idle_on) = {
            let mut state = self.state.lock().await;
            assert!(
                state.listen_targets.remove(&target_id).is_some(),
                "unlisten for unknown target {target_id}"
            );
            let send_on = state.watch_stream.clone().filter(|s| s.is_open());
            if send_on.is_some() {
                state.record_pending_response(target_id);
            }
            let idle_on = if state.listen_targets.is_empty() {
                state.watch_stream.clone().filter(|s| s.is_started())
            } else {
                None
            };
            (send_on, idle_on)
        };

        if let Some(stream) = &send_on {
            stream.unwatch_target(target_id).await?;
        }
        if let Some(stream) = idle_on {
            stream.mark_idle();
        }
        Ok(())
    }

    async fn start_watch_stream(self: &Arc<Self>) {
        let stream = {
            let state = self.state.lock().await;
            if !state.should_start_watch_stream() {
                return;
            }
            state
                .watch_stream
                .clone()
                .expect("should_start_watch_stream implies a stream handle")
        };
        let delegate = Arc::new(RemoteWatchDelegate {
            inner: Arc::downgrade(self),
        });
        stream.start(delegate);
    }

    async fn on_watch_open(self: &Arc<Self>) -> DocSyncResult<()> {
        let (stream, targets) = {
            let mut state = self.state.lock().await;
            let stream = match state.watch_stream.clone() {
                Some(stream) => stream,
                None => return Ok(()),
            };
            let targets: Vec<QueryData> = state.listen_targets.values().cloned().collect();
            for query in &targets {
                state.record_pending_response(query.target_id());
            }
            (stream, targets)
        };

        for query in targets {
            stream.watch_query(&query).await?;
        }
        Ok(())
    }

    async fn on_watch_change(
        self: &Arc<Self>,
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    ) -> DocSyncResult<()> {
        self.online_state.lock().await.handle_message_received();

        if let WatchChange::TargetChange(target_change) = &change {
            if target_change.state == TargetChangeState::Removed && target_change.cause.is_some() {
                // Raised immediately, independent of accumulation.
                return self.process_target_error(target_change.clone()).await;
            }
        }

        let (changes, listen_targets, pending) = {
            let mut state = self.state.lock().await;
            state.accumulated_changes.push(change);
            if snapshot_version.is_none()
                || snapshot_version < self.local_store.last_remote_snapshot_version()
            {
                // Not a consistency point yet; keep accumulating.
                return Ok(());
            }
            let changes = std::mem::take(&mut state.accumulated_changes);
            let listen_targets = state.listen_targets.clone();
            let pending = std::mem::take(&mut state.pending_target_responses);
            (changes, listen_targets, pending)
        };

        let mut aggregator = WatchChangeAggregator::new(snapshot_version, &listen_targets, pending);
        for change in changes {
            aggregator.handle_watch_change(change);
        }
        let Aggregation {
            mut remote_event,
            pending_target_responses,
            existence_filters,
        } = aggregator.aggregate();

        {
            let mut state = self.state.lock().await;
            state.pending_target_responses = pending_target_responses;
        }

        self.reconcile_existence_filters(&mut remote_event, existence_filters)
            .await?;
        self.update_resume_tokens(&remote_event).await;
        self.sync_engine.apply_remote_event(remote_event).await
    }

    async fn process_target_error(
        self: &Arc<Self>,
        change: WatchTargetChange,
    ) -> DocSyncResult<()> {
        let cause = change.cause.clone().expect("target error carries a cause");
        for target_id in change.target_ids {
            // Pending-response bookkeeping is left alone: an acknowledgement
            // for this target may already sit in the accumulated changes,
            // and stale counters are dropped with the next stream cleanup.
            let removed = {
                let mut state = self.state.lock().await;
                state.listen_targets.remove(&target_id).is_some()
            };
            // Targets already removed are ignored.
            if removed {
                log::warn!("listen target {target_id} rejected by backend: {cause}");
                self.sync_engine
                    .reject_listen(target_id, cause.clone())
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_watch_close(self: &Arc<Self>, error: Option<DocSyncError>) {
        let should_restart = {
            let mut state = self.state.lock().await;
            assert!(
                state.network_enabled(),
                "watch stream callback while the network is disabled"
            );
            state.clear_watch_state();
            state.should_start_watch_stream()
        };

        if let Some(error) = &error {
            log::warn!("watch stream closed: {error}");
        }

        if should_restart {
            self.online_state.lock().await.handle_stream_failure();
            self.start_watch_stream().await;
        } else {
            self.online_state.lock().await.set_unknown();
        }
    }

    /// Applies existence filters the aggregator surfaced, repairing any
    /// drift between the local view of a target and the backend's count.
    async fn reconcile_existence_filters(
        self: &Arc<Self>,
        remote_event: &mut RemoteEvent,
        existence_filters: BTreeMap<TargetId, ExistenceFilter>,
    ) -> DocSyncResult<()> {
        for (target_id, filter) in existence_filters {
            let query_data = {
                let state = self.state.lock().await;
                match state.listen_targets.get(&target_id) {
                    Some(query_data) => query_data.clone(),
                    // Unlistened while the filter was in flight.
                    None => continue,
                }
            };

            if query_data.query().is_document_query() {
                match filter.count {
                    0 => {
                        let key = DocumentKey::from_path(query_data.query().path().clone())?;
                        remote_event.add_document_update(MaybeDocument::NoDocument(
                            NoDocument::new(key, remote_event.snapshot_version),
                        ));
                    }
                    1 => {}
                    other => panic!(
                        "existence filter for document target {target_id} reported {other} documents"
                    ),
                }
                continue;
            }

            let mut tracked = self.local_store.remote_document_keys(target_id);
            if let Some(change) = remote_event.target_changes.get(&target_id) {
                if let Some(mapping) = &change.mapping {
                    mapping.apply_to(&mut tracked);
                }
            }
            if tracked.len() as i32 == filter.count {
                continue;
            }

            log::debug!(
                "existence filter mismatch for target {target_id}: local {} vs backend {}",
                tracked.len(),
                filter.count
            );
            remote_event.on_existence_filter_mismatch(target_id);

            // Force a full re-listen: the stored target loses its resume
            // token, and the one-off re-watch carries the mismatch purpose
            // without being stored.
            let fresh = QueryData::new(query_data.query().clone(), target_id, QueryPurpose::Listen);
            let stream = {
                let mut state = self.state.lock().await;
                state.listen_targets.insert(target_id, fresh);
                let stream = state.watch_stream.clone().filter(|s| s.is_open());
                if stream.is_some() {
                    state.record_pending_response(target_id);
                    state.record_pending_response(target_id);
                }
                stream
            };
            if let Some(stream) = stream {
                stream.unwatch_target(target_id).await?;
                let relisten = QueryData::new(
                    query_data.query().clone(),
                    target_id,
                    QueryPurpose::ExistenceFilterMismatch,
                );
                stream.watch_query(&relisten).await?;
            }
        }
        Ok(())
    }

    /// Advances stored resume tokens for targets the event progressed.
    /// Tokens never regress: an event older than the stored snapshot leaves
    /// the target untouched.
    async fn update_resume_tokens(&self, remote_event: &RemoteEvent) {
        let mut state = self.state.lock().await;
        for (target_id, change) in &remote_event.target_changes {
            let token = match &change.resume_token {
                Some(token) if !token.is_empty() => token.clone(),
                _ => continue,
            };
            let existing = match state.listen_targets.get(target_id) {
                Some(existing) => existing,
                None => continue,
            };
            if change.snapshot_version >= existing.snapshot_version() {
                let updated = existing.with_snapshot(change.snapshot_version, Some(token));
                state.listen_targets.insert(*target_id, updated);
            }
        }
    }

    async fn fill_write_pipeline(self: &Arc<Self>) -> DocSyncResult<()> {
        loop {
            let (can_fetch, last_batch_seen) = {
                let state = self.state.lock().await;
                (state.can_write_mutations(), state.last_batch_seen)
            };
            if !can_fetch {
                break;
            }

            match self
                .local_store
                .next_mutation_batch_after(last_batch_seen)
                .await?
            {
                Some(batch) => self.commit_batch(batch).await?,
                None => {
                    let idle_on = {
                        let state = self.state.lock().await;
                        if state.write_pipeline.is_empty() {
                            state.write_stream.clone().filter(|s| s.is_started())
                        } else {
                            None
                        }
                    };
                    if let Some(stream) = idle_on {
                        stream.mark_idle();
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn commit_batch(self: &Arc<Self>, batch: MutationBatch) -> DocSyncResult<()> {
        let mutations = batch.mutations.clone();
        let (start_stream, send_on) = {
            let mut state = self.state.lock().await;
            debug_assert!(state.write_pipeline.len() < MAX_PENDING_WRITES);
            state.last_batch_seen = Some(batch.batch_id);
            state.write_pipeline.push_back(batch);
            if state.should_start_write_stream() {
                (true, None)
            } else {
                // Batches accepted before the handshake completes stay
                // buffered in the pipeline and are drained on completion.
                let stream = state.write_stream.clone().filter(|s| s.handshake_complete());
                (false, stream)
            }
        };

        if start_stream {
            self.start_write_stream().await;
        } else if let Some(stream) = send_on {
            stream.write_mutations(&mutations).await?;
        }
        Ok(())
    }

    async fn start_write_stream(self: &Arc<Self>) {
        let stream = {
            let state = self.state.lock().await;
            if !state.should_start_write_stream() {
                return;
            }
            state
                .write_stream
                .clone()
                .expect("should_start_write_stream implies a stream handle")
        };
        let delegate = Arc::new(RemoteWriteDelegate {
            inner: Arc::downgrade(self),
        });
        stream.start(delegate);
    }

    async fn on_write_open(self: &Arc<Self>) -> DocSyncResult<()> {
        let stream = {
            let mut state = self.state.lock().await;
            state.write_stream_open_time = Some(Timestamp::now());
            state.write_stream.clone()
        };
        match stream {
            Some(stream) => stream.write_handshake().await,
            None => Ok(()),
        }
    }

    async fn on_write_handshake_complete(self: &Arc<Self>) -> DocSyncResult<()> {
        let (stream, batches) = {
            let state = self.state.lock().await;
            let stream = match state.write_stream.clone() {
                Some(stream) => stream,
                None => return Ok(()),
            };
            let batches: Vec<Vec<Mutation>> = state
                .write_pipeline
                .iter()
                .map(|batch| batch.mutations.clone())
                .collect();
            (stream, batches)
        };

        self.local_store
            .set_last_stream_token(stream.last_stream_token())
            .await?;

        // Everything in the pipeline predates the handshake; the pipeline
        // was bounded on entry, so this resend skips the can-write check.
        for mutations in batches {
            stream.write_mutations(&mutations).await?;
        }
        Ok(())
    }

    async fn on_write_response(
        self: &Arc<Self>,
        commit_version: SnapshotVersion,
        results: Vec<MutationResult>,
    ) -> DocSyncResult<()> {
        let (batch, stream_token) = {
            let mut state = self.state.lock().await;
            let batch = state
                .write_pipeline
                .pop_front()
                .unwrap_or_else(|| panic!("write response without a pending batch"));
            let token = state
                .write_stream
                .as_ref()
                .and_then(|stream| stream.last_stream_token());
            (batch, token)
        };

        let result = MutationBatchResult::from(batch, commit_version, results, stream_token)?;
        self.sync_engine.apply_successful_write(result).await?;
        self.fill_write_pipeline().await
    }

    async fn on_write_close(self: &Arc<Self>, error: Option<DocSyncError>) -> DocSyncResult<()> {
        let (has_pending, handshake_complete, opened_at) = {
            let mut state = self.state.lock().await;
            assert!(
                state.network_enabled(),
                "write stream callback while the network is disabled"
            );
            let handshake_complete = state
                .write_stream
                .as_ref()
                .map(|stream| stream.handshake_complete())
                .unwrap_or(false);
            (
                !state.write_pipeline.is_empty(),
                handshake_complete,
                state.write_stream_open_time.take(),
            )
        };

        if let Some(opened_at) = opened_at {
            let session = Timestamp::now().seconds - opened_at.seconds;
            log::debug!("write stream session ended after {session}s");
        }

        if let Some(error) = error {
            log::warn!("write stream closed: {error}");
            if has_pending {
                if handshake_complete {
                    self.handle_write_error(error).await?;
                } else {
                    self.handle_handshake_error(error).await?;
                }
            }
        }

        let should_restart = self.state.lock().await.should_start_write_stream();
        if should_restart {
            self.start_write_stream().await;
        }
        Ok(())
    }

    async fn handle_handshake_error(self: &Arc<Self>, error: DocSyncError) -> DocSyncResult<()> {
        if self.datastore.is_permanent_write_error(&error) || self.datastore.is_aborted(&error) {
            // The session token is no longer usable; the next handshake
            // starts clean.
            let stream = self.state.lock().await.write_stream.clone();
            if let Some(stream) = stream {
                stream.set_last_stream_token(None);
            }
            self.local_store.set_last_stream_token(None).await?;
        }
        Ok(())
    }

    async fn handle_write_error(self: &Arc<Self>, error: DocSyncError) -> DocSyncResult<()> {
        // Transient failures are retried by the stream's own backoff.
        if !self.datastore.is_permanent_write_error(&error) {
            return Ok(());
        }

        let (batch, stream) = {
            let mut state = self.state.lock().await;
            (state.write_pipeline.pop_front(), state.write_stream.clone())
        };
        let batch = match batch {
            Some(batch) => batch,
            None => return Ok(()),
        };

        if let Some(stream) = stream {
            // The fault was specific to this request, not the channel.
            stream.inhibit_backoff();
        }
        self.sync_engine
            .reject_failed_write(batch.batch_id, error)
            .await?;
        self.fill_write_pipeline().await
    }
}

struct RemoteWatchDelegate {
    inner: Weak<RemoteStoreInner>,
}

#[async_trait]
impl WatchStreamDelegate for RemoteWatchDelegate {
    async fn on_open(&self) -> DocSyncResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_watch_open().await,
            None => Ok(()),
        }
    }

    async fn on_change(
        &self,
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    ) -> DocSyncResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_watch_change(change, snapshot_version).await,
            None => Ok(()),
        }
    }

    async fn on_close(&self, error: Option<DocSyncError>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_watch_close(error).await;
        }
    }
}

struct RemoteWriteDelegate {
    inner: Weak<RemoteStoreInner>,
}

#[async_trait]
impl WriteStreamDelegate for RemoteWriteDelegate {
    async fn on_open(&self) -> DocSyncResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_write_open().await,
            None => Ok(()),
        }
    }

    async fn on_handshake_complete(&self) -> DocSyncResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_write_handshake_complete().await,
            None => Ok(()),
        }
    }

    async fn on_response(
        &self,
        commit_version: SnapshotVersion,
        results: Vec<MutationResult>,
    ) -> DocSyncResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_write_response(commit_version, results).await,
            None => Ok(()),
        }
    }

    async fn on_close(&self, error: Option<DocSyncError>) {
        if let Some(inner) = self.inner.upgrade() {
            if let Err(err) = inner.on_write_close(error).await {
                log::warn!("write stream close handling failed: {err}");
            }
        }
    }
}
