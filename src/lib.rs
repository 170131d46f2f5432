//! Client-side core for the DocSync hosted document database.
//!
//! The crate keeps a local replica in sync with the backend over two
//! long-lived bidirectional streams: a *watch* stream delivering incremental
//! query results and a *write* stream carrying acknowledged mutation
//! batches. The [`remote::RemoteStore`] facade owns both streams and
//! mediates between the local persistence layer ([`local::LocalStore`]) and
//! the synchronization engine ([`remote::SyncEngine`]).

pub mod error;
pub mod local;
pub mod model;
pub mod remote;

mod runtime;

#[doc(inline)]
pub use error::{DocSyncError, DocSyncErrorCode, DocSyncResult};
#[doc(inline)]
pub use local::LocalStore;
#[doc(inline)]
pub use model::{
    DatabaseId, Document, DocumentKey, FieldMap, MaybeDocument, NoDocument, Query, ResourcePath,
    SnapshotVersion, Timestamp, User,
};
#[doc(inline)]
pub use remote::{
    Datastore, JsonSerializer, MutationBatch, OnlineState, OnlineStateDelegate, QueryData,
    QueryPurpose, RemoteEvent, RemoteStore, StreamingDatastore, SyncEngine, TargetId, Transaction,
};
