use std::sync::Arc;

use crate::error::DocSyncResult;
use crate::model::{DocumentKey, FieldMap, SnapshotVersion};
use crate::remote::datastore::Datastore;
use crate::remote::mutation::Mutation;

/// A group of writes committed atomically outside the streaming pipeline.
///
/// Transactions bypass the write pipeline entirely: they go straight to the
/// datastore and neither observe nor affect pending batches.
pub struct Transaction {
    datastore: Arc<dyn Datastore>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub(crate) fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            mutations: Vec::new(),
        }
    }

    pub fn set(&mut self, key: DocumentKey, fields: FieldMap) {
        self.mutations.push(Mutation::Set { key, fields });
    }

    pub fn patch(&mut self, key: DocumentKey, fields: FieldMap, field_mask: Vec<String>) {
        self.mutations.push(Mutation::Patch {
            key,
            fields,
            field_mask,
        });
    }

    pub fn delete(&mut self, key: DocumentKey) {
        self.mutations.push(Mutation::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Commits the buffered writes. An empty transaction is a no-op.
    pub async fn commit(self) -> DocSyncResult<SnapshotVersion> {
        if self.mutations.is_empty() {
            return Ok(SnapshotVersion::NONE);
        }
        let (commit_version, _results) = self.datastore.commit(self.mutations).await?;
        Ok(commit_version)
    }
}
