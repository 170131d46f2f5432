pub mod connection;
pub mod datastore;
pub mod mutation;
pub mod online_state;
pub mod query_data;
pub mod remote_event;
pub mod remote_store;
pub mod serializer;
pub mod streams;
pub mod sync_engine;
pub mod transaction;
pub mod watch_change;
pub mod watch_change_aggregator;

#[doc(inline)]
pub use connection::{
    in_memory_pair, BackendStream, InMemoryBackend, InMemoryConnection, RawStream, StreamKind,
    StreamingConnection,
};
#[doc(inline)]
pub use datastore::{Datastore, RetrySettings, StreamingDatastore};
#[doc(inline)]
pub use mutation::{BatchId, Mutation, MutationBatch, MutationBatchResult, MutationResult};
#[doc(inline)]
pub use online_state::{OnlineState, OnlineStateDelegate, MAX_WATCH_STREAM_FAILURES};
#[doc(inline)]
pub use query_data::{QueryData, QueryPurpose, TargetId};
#[doc(inline)]
pub use remote_event::{RemoteEvent, ResetMapping, TargetChange, TargetMapping, UpdateMapping};
#[doc(inline)]
pub use remote_store::RemoteStore;
#[doc(inline)]
pub use serializer::JsonSerializer;
#[doc(inline)]
pub use streams::{
    PersistentWatchStream, PersistentWriteStream, WatchStream, WatchStreamDelegate, WriteStream,
    WriteStreamDelegate,
};
#[doc(inline)]
pub use sync_engine::{box_sync_future, SyncEngine, SyncFuture};
#[doc(inline)]
pub use transaction::Transaction;
#[doc(inline)]
pub use watch_change::{
    change_snapshot_version, decode_watch_change, DocumentWatchChange, ExistenceFilter,
    ExistenceFilterWatchChange, TargetChangeState, WatchChange, WatchTargetChange,
};
#[doc(inline)]
pub use watch_change_aggregator::{Aggregation, WatchChangeAggregator};
