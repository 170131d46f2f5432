pub mod database_id;
pub mod document;
pub mod document_key;
pub mod query;
pub mod resource_path;
pub mod snapshot_version;
pub mod timestamp;
pub mod user;

#[doc(inline)]
pub use database_id::{DatabaseId, DEFAULT_DATABASE};
#[doc(inline)]
pub use document::{Document, FieldMap, MaybeDocument, NoDocument};
#[doc(inline)]
pub use document_key::DocumentKey;
#[doc(inline)]
pub use query::Query;
#[doc(inline)]
pub use resource_path::ResourcePath;
#[doc(inline)]
pub use snapshot_version::SnapshotVersion;
#[doc(inline)]
pub use timestamp::Timestamp;
#[doc(inline)]
pub use user::User;
