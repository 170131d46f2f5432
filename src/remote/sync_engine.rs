use futures::FutureExt;

use crate::error::{DocSyncError, DocSyncResult};
use crate::remote::mutation::{BatchId, MutationBatchResult};
use crate::remote::query_data::TargetId;
use crate::remote::remote_event::RemoteEvent;

pub type SyncFuture<'a, T> = futures::future::BoxFuture<'a, T>;

pub fn box_sync_future<'a, F, T>(future: F) -> SyncFuture<'a, T>
where
    F: std::future::Future<Output = T> + Send + 'a,
{
    future.boxed()
}

/// Bridge from the remote store to the local synchronization engine.
///
/// The sync engine owns all user-visible outcomes: it applies consistent
/// remote events to the local view, surfaces listen rejections to query
/// observers, and settles user write promises.
pub trait SyncEngine: Send + Sync + 'static {
    /// Applies a consistent cut of remote changes.
    fn apply_remote_event(&self, event: RemoteEvent) -> SyncFuture<'_, DocSyncResult<()>>;

    /// A listen target was rejected by the backend; the target is already
    /// removed from the remote store's bookkeeping.
    fn reject_listen(
        &self,
        target_id: TargetId,
        error: DocSyncError,
    ) -> SyncFuture<'_, DocSyncResult<()>>;

    /// The backend acknowledged a mutation batch.
    fn apply_successful_write(
        &self,
        result: MutationBatchResult,
    ) -> SyncFuture<'_, DocSyncResult<()>>;

    /// A mutation batch failed permanently and was dropped from the
    /// pipeline.
    fn reject_failed_write(
        &self,
        batch_id: BatchId,
        error: DocSyncError,
    ) -> SyncFuture<'_, DocSyncResult<()>>;
}
