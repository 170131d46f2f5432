use std::collections::{BTreeMap, BTreeSet};

use crate::model::{DocumentKey, MaybeDocument, SnapshotVersion};
use crate::remote::query_data::TargetId;

/// How a target's document membership changed within one remote event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMapping {
    /// Incremental additions/removals relative to the previously known set.
    Update(UpdateMapping),
    /// Authoritative replacement of the whole set.
    Reset(ResetMapping),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMapping {
    pub added_documents: BTreeSet<DocumentKey>,
    pub removed_documents: BTreeSet<DocumentKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetMapping {
    pub documents: BTreeSet<DocumentKey>,
}

impl TargetMapping {
    pub fn add_document(&mut self, key: DocumentKey) {
        match self {
            TargetMapping::Update(mapping) => {
                mapping.removed_documents.remove(&key);
                mapping.added_documents.insert(key);
            }
            TargetMapping::Reset(mapping) => {
                mapping.documents.insert(key);
            }
        }
    }

    pub fn remove_document(&mut self, key: DocumentKey) {
        match self {
            TargetMapping::Update(mapping) => {
                mapping.added_documents.remove(&key);
                mapping.removed_documents.insert(key);
            }
            TargetMapping::Reset(mapping) => {
                mapping.documents.remove(&key);
            }
        }
    }

    /// Projects the mapping onto an externally tracked key set.
    pub fn apply_to(&self, keys: &mut BTreeSet<DocumentKey>) {
        match self {
            TargetMapping::Update(mapping) => {
                for key in &mapping.added_documents {
                    keys.insert(key.clone());
                }
                for key in &mapping.removed_documents {
                    keys.remove(key);
                }
            }
            TargetMapping::Reset(mapping) => {
                *keys = mapping.documents.clone();
            }
        }
    }
}

/// Per-target outcome of one remote event.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetChange {
    /// The backend confirmed the target has caught up to the snapshot.
    pub current: bool,
    pub mapping: Option<TargetMapping>,
    pub resume_token: Option<Vec<u8>>,
    pub snapshot_version: SnapshotVersion,
}

impl TargetChange {
    pub(crate) fn at_version(snapshot_version: SnapshotVersion) -> Self {
        Self {
            current: false,
            mapping: None,
            resume_token: None,
            snapshot_version,
        }
    }
}

/// A consistent cut of target and document updates at one snapshot version,
/// ready for the sync engine.
#[derive(Debug, Clone, Default)]
pub struct RemoteEvent {
    pub snapshot_version: SnapshotVersion,
    pub target_changes: BTreeMap<TargetId, TargetChange>,
    pub document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    pub existence_filter_mismatches: BTreeSet<TargetId>,
}

impl RemoteEvent {
    pub fn new(snapshot_version: SnapshotVersion) -> Self {
        Self {
            snapshot_version,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target_changes.is_empty()
            && self.document_updates.is_empty()
            && self.existence_filter_mismatches.is_empty()
    }

    pub fn add_document_update(&mut self, document: MaybeDocument) {
        self.document_updates
            .insert(document.key().clone(), document);
    }

    /// Marks a target whose local view diverged from the backend's existence
    /// filter. The target's accumulated membership is replaced by an empty
    /// reset so the sync engine discards its remote state before re-listening.
    pub fn on_existence_filter_mismatch(&mut self, target_id: TargetId) {
        self.existence_filter_mismatches.insert(target_id);
        let change = self
            .target_changes
            .entry(target_id)
            .or_insert_with(|| TargetChange::at_version(self.snapshot_version));
        change.current = false;
        change.resume_token = None;
        change.mapping = Some(TargetMapping::Reset(ResetMapping::default()));
    }

    pub fn existence_filter_mismatch(&self, target_id: TargetId) -> bool {
        self.existence_filter_mismatches.contains(&target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn update_mapping_keeps_sets_disjoint() {
        let mut mapping = TargetMapping::Update(UpdateMapping::default());
        mapping.add_document(key("notes/n1"));
        mapping.remove_document(key("notes/n1"));
        match &mapping {
            TargetMapping::Update(update) => {
                assert!(update.added_documents.is_empty());
                assert_eq!(update.removed_documents.len(), 1);
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn reset_mapping_overrides_tracked_keys() {
        let mut tracked: BTreeSet<DocumentKey> = [key("notes/n1"), key("notes/n2")].into();
        let mut reset = ResetMapping::default();
        reset.documents.insert(key("notes/n3"));
        TargetMapping::Reset(reset).apply_to(&mut tracked);
        assert_eq!(tracked, [key("notes/n3")].into());
    }

    #[test]
    fn update_mapping_adjusts_tracked_keys() {
        let mut tracked: BTreeSet<DocumentKey> = [key("notes/n1"), key("notes/n2")].into();
        let mut update = UpdateMapping::default();
        update.added_documents.insert(key("notes/n3"));
        update.removed_documents.insert(key("notes/n1"));
        TargetMapping::Update(update).apply_to(&mut tracked);
        assert_eq!(tracked, [key("notes/n2"), key("notes/n3")].into());
    }

    #[test]
    fn mismatch_resets_target_change() {
        let mut event = RemoteEvent::new(SnapshotVersion::NONE);
        event.target_changes.insert(
            2,
            TargetChange {
                current: true,
                mapping: None,
                resume_token: Some(b"tok".to_vec()),
                snapshot_version: SnapshotVersion::NONE,
            },
        );
        event.on_existence_filter_mismatch(2);
        assert!(event.existence_filter_mismatch(2));
        let change = &event.target_changes[&2];
        assert!(!change.current);
        assert!(change.resume_token.is_none());
        assert_eq!(
            change.mapping,
            Some(TargetMapping::Reset(ResetMapping::default()))
        );
    }
}
