pub(crate) mod persistent;
pub mod watch;
pub mod write;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DocSyncError, DocSyncResult};
use crate::model::SnapshotVersion;
use crate::remote::mutation::{Mutation, MutationResult};
use crate::remote::query_data::{QueryData, TargetId};
use crate::remote::watch_change::WatchChange;

#[doc(inline)]
pub use watch::PersistentWatchStream;
#[doc(inline)]
pub use write::PersistentWriteStream;

/// Control surface of the long-lived listen channel.
///
/// `start` arms a single connection attempt; when the session ends the
/// delegate's `on_close` fires exactly once and the stream returns to the
/// not-started state, ready for another `start`. `stop` is the hard
/// cancellation: after it returns, no delegate method fires until the next
/// `start`.
#[async_trait]
pub trait WatchStream: Send + Sync + 'static {
    fn start(&self, delegate: Arc<dyn WatchStreamDelegate>);
    async fn stop(&self);
    fn is_started(&self) -> bool;
    fn is_open(&self) -> bool;
    /// Hints that the stream has no active targets; the transport may close
    /// the idle connection.
    fn mark_idle(&self);
    /// Sends a watch request for the target. The stream must be open.
    async fn watch_query(&self, query: &QueryData) -> DocSyncResult<()>;
    /// Sends an unwatch request for the target. The stream must be open.
    async fn unwatch_target(&self, target_id: TargetId) -> DocSyncResult<()>;
}

#[async_trait]
pub trait WatchStreamDelegate: Send + Sync + 'static {
    async fn on_open(&self) -> DocSyncResult<()>;
    async fn on_change(
        &self,
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    ) -> DocSyncResult<()>;
    async fn on_close(&self, error: Option<DocSyncError>);
}

/// Control surface of the long-lived write channel.
///
/// Each session begins with a handshake establishing a stream token;
/// mutations may only be written once `handshake_complete` reports true.
/// `handshake_complete` and `last_stream_token` survive a close so the
/// owner can classify the failure and resume the session.
#[async_trait]
pub trait WriteStream: Send + Sync + 'static {
    fn start(&self, delegate: Arc<dyn WriteStreamDelegate>);
    async fn stop(&self);
    fn is_started(&self) -> bool;
    fn handshake_complete(&self) -> bool;
    fn last_stream_token(&self) -> Option<Vec<u8>>;
    fn set_last_stream_token(&self, token: Option<Vec<u8>>);
    /// Hints that the pipeline is empty; the transport may close the idle
    /// connection.
    fn mark_idle(&self);
    /// Clears accumulated backoff so the next `start` connects immediately.
    /// Used when a failure was specific to one request, not the channel.
    fn inhibit_backoff(&self);
    async fn write_handshake(&self) -> DocSyncResult<()>;
    async fn write_mutations(&self, mutations: &[Mutation]) -> DocSyncResult<()>;
}

#[async_trait]
pub trait WriteStreamDelegate: Send + Sync + 'static {
    async fn on_open(&self) -> DocSyncResult<()>;
    async fn on_handshake_complete(&self) -> DocSyncResult<()>;
    async fn on_response(
        &self,
        commit_version: SnapshotVersion,
        results: Vec<MutationResult>,
    ) -> DocSyncResult<()>;
    async fn on_close(&self, error: Option<DocSyncError>);
}
