use std::collections::BTreeMap;

use crate::error::{internal_error, DocSyncResult};
use crate::model::{DocumentKey, FieldMap, SnapshotVersion, Timestamp};

/// Identifier the local store assigns to one mutation batch. Ids increase in
/// commit order per user.
pub type BatchId = i32;

/// A single write queued for the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Replace the document's fields wholesale.
    Set { key: DocumentKey, fields: FieldMap },
    /// Merge the listed fields into the existing document.
    Patch {
        key: DocumentKey,
        fields: FieldMap,
        field_mask: Vec<String>,
    },
    /// Delete the document.
    Delete { key: DocumentKey },
}

impl Mutation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            Mutation::Set { key, .. } => key,
            Mutation::Patch { key, .. } => key,
            Mutation::Delete { key } => key,
        }
    }
}

/// Atomic group of writes accepted from the user, queued locally until the
/// backend acknowledges it.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationBatch {
    pub batch_id: BatchId,
    pub local_write_time: Timestamp,
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(batch_id: BatchId, local_write_time: Timestamp, mutations: Vec<Mutation>) -> Self {
        Self {
            batch_id,
            local_write_time,
            mutations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn document_keys(&self) -> Vec<DocumentKey> {
        self.mutations
            .iter()
            .map(|mutation| mutation.key().clone())
            .collect()
    }
}

/// Backend acknowledgement for a single mutation within a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationResult {
    /// Version at which the write took effect; absent when the backend only
    /// reported the commit time.
    pub version: Option<SnapshotVersion>,
}

/// Successful acknowledgement of a whole mutation batch, ready to hand to
/// the sync engine.
#[derive(Clone, Debug)]
pub struct MutationBatchResult {
    pub batch: MutationBatch,
    pub commit_version: SnapshotVersion,
    pub mutation_results: Vec<MutationResult>,
    pub stream_token: Option<Vec<u8>>,
    /// Resulting remote version per mutated document.
    pub doc_versions: BTreeMap<DocumentKey, SnapshotVersion>,
}

impl MutationBatchResult {
    pub fn from(
        batch: MutationBatch,
        commit_version: SnapshotVersion,
        mutation_results: Vec<MutationResult>,
        stream_token: Option<Vec<u8>>,
    ) -> DocSyncResult<Self> {
        if batch.mutations.len() != mutation_results.len() {
            return Err(internal_error(format!(
                "Mutation batch {} expected {} results but received {}",
                batch.batch_id,
                batch.mutations.len(),
                mutation_results.len()
            )));
        }

        let mut doc_versions = BTreeMap::new();
        for (mutation, result) in batch.mutations.iter().zip(mutation_results.iter()) {
            let version = result.version.unwrap_or(commit_version);
            doc_versions.insert(mutation.key().clone(), version);
        }

        Ok(Self {
            batch,
            commit_version,
            mutation_results,
            stream_token,
            doc_versions,
        })
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch.batch_id
    }
}
