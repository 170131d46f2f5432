use std::collections::BTreeSet;

use crate::error::DocSyncResult;
use crate::model::{DocumentKey, SnapshotVersion};
use crate::remote::mutation::{BatchId, MutationBatch};
use crate::remote::query_data::TargetId;
use crate::remote::sync_engine::SyncFuture;

/// Contract the remote store relies on from the local persistence layer.
///
/// The remote store never caches answers from these methods; it asks again
/// whenever it needs current state, so implementations must reflect the
/// latest committed local data.
pub trait LocalStore: Send + Sync + 'static {
    /// The next mutation batch committed after `batch_id`, in batch-id
    /// order. `None` for `batch_id` requests the very first batch; a `None`
    /// result means the queue is drained.
    fn next_mutation_batch_after(
        &self,
        batch_id: Option<BatchId>,
    ) -> SyncFuture<'_, DocSyncResult<Option<MutationBatch>>>;

    /// Document keys the backend most recently confirmed as matching the
    /// target.
    fn remote_document_keys(&self, target_id: TargetId) -> BTreeSet<DocumentKey>;

    /// Version of the last remote event applied to the local view. Watch
    /// changes older than this are stale and must not be re-emitted.
    fn last_remote_snapshot_version(&self) -> SnapshotVersion;

    /// Opaque write-stream token persisted from the previous session.
    fn last_stream_token(&self) -> Option<Vec<u8>>;

    /// Persists the write-stream token verbatim; `None` clears it.
    fn set_last_stream_token(&self, token: Option<Vec<u8>>) -> SyncFuture<'_, DocSyncResult<()>>;
}
