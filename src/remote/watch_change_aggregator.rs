use std::collections::{BTreeMap, BTreeSet};

use crate::model::{DocumentKey, MaybeDocument, SnapshotVersion};
use crate::remote::query_data::{QueryData, TargetId};
use crate::remote::remote_event::{
    RemoteEvent, ResetMapping, TargetChange, TargetMapping, UpdateMapping,
};
use crate::remote::watch_change::{
    DocumentWatchChange, ExistenceFilter, TargetChangeState, WatchChange, WatchTargetChange,
};

/// Result of folding one batch of accumulated watch changes.
pub struct Aggregation {
    pub remote_event: RemoteEvent,
    /// Updated watch/unwatch acknowledgement counters.
    pub pending_target_responses: BTreeMap<TargetId, u32>,
    /// Existence filters seen in the batch, keyed by target. Reconciled by
    /// the watch subsystem after the event is assembled.
    pub existence_filters: BTreeMap<TargetId, ExistenceFilter>,
}

/// Folds raw watch changes into a consistent [`RemoteEvent`].
///
/// An aggregator is scoped to a single snapshot emission: construct it with
/// the current listen table and acknowledgement counters, feed it every
/// change accumulated since the previous emission, then consume it with
/// [`aggregate`](Self::aggregate).
pub struct WatchChangeAggregator<'a> {
    snapshot_version: SnapshotVersion,
    listen_targets: &'a BTreeMap<TargetId, QueryData>,
    pending_target_responses: BTreeMap<TargetId, u32>,
    target_changes: BTreeMap<TargetId, TargetChange>,
    document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    existence_filters: BTreeMap<TargetId, ExistenceFilter>,
}

impl<'a> WatchChangeAggregator<'a> {
    pub fn new(
        snapshot_version: SnapshotVersion,
        listen_targets: &'a BTreeMap<TargetId, QueryData>,
        pending_target_responses: BTreeMap<TargetId, u32>,
    ) -> Self {
        Self {
            snapshot_version,
            listen_targets,
            pending_target_responses,
            target_changes: BTreeMap::new(),
            document_updates: BTreeMap::new(),
            existence_filters: BTreeMap::new(),
        }
    }

    pub fn handle_watch_change(&mut self, change: WatchChange) {
        match change {
            WatchChange::TargetChange(target_change) => self.handle_target_change(target_change),
            WatchChange::Document(doc_change) => self.handle_document_change(doc_change),
            WatchChange::ExistenceFilter(filter_change) => {
                self.existence_filters
                    .insert(filter_change.target_id, filter_change.filter);
            }
        }
    }

    fn handle_target_change(&mut self, change: WatchTargetChange) {
        debug_assert!(
            change.cause.is_none(),
            "target errors are handled before aggregation"
        );

        if matches!(
            change.state,
            TargetChangeState::Added | TargetChangeState::Removed
        ) {
            for &target_id in &change.target_ids {
                self.record_target_response(target_id);
            }
        }

        // An empty id list addresses every active target.
        let affected: Vec<TargetId> = if change.target_ids.is_empty() {
            self.listen_targets.keys().copied().collect()
        } else {
            change.target_ids.clone()
        };

        for target_id in affected {
            match change.state {
                TargetChangeState::Current => {
                    self.ensure_target_change(target_id).current = true;
                }
                TargetChangeState::Reset => {
                    let entry = self.ensure_target_change(target_id);
                    entry.current = false;
                    entry.mapping = Some(TargetMapping::Reset(ResetMapping::default()));
                }
                TargetChangeState::NoChange
                | TargetChangeState::Added
                | TargetChangeState::Removed => {}
            }

            if let Some(token) = &change.resume_token {
                if !token.is_empty() {
                    self.ensure_target_change(target_id).resume_token = Some(token.clone());
                }
            }
        }
    }

    fn handle_document_change(&mut self, change: DocumentWatchChange) {
        for &target_id in &change.updated_target_ids {
            self.target_mapping(target_id).add_document(change.key.clone());
        }
        for &target_id in &change.removed_target_ids {
            self.target_mapping(target_id)
                .remove_document(change.key.clone());
        }
        if let Some(document) = change.new_document {
            self.document_updates
                .insert(document.key().clone(), document);
        }
    }

    fn record_target_response(&mut self, target_id: TargetId) {
        let count = self
            .pending_target_responses
            .get_mut(&target_id)
            .unwrap_or_else(|| panic!("Unsolicited target response for target {target_id}"));
        assert!(*count > 0, "pending response count underflow");
        *count -= 1;
        if *count == 0 {
            self.pending_target_responses.remove(&target_id);
        }
    }

    fn ensure_target_change(&mut self, target_id: TargetId) -> &mut TargetChange {
        let snapshot_version = self.snapshot_version;
        self.target_changes
            .entry(target_id)
            .or_insert_with(|| TargetChange::at_version(snapshot_version))
    }

    fn target_mapping(&mut self, target_id: TargetId) -> &mut TargetMapping {
        self.ensure_target_change(target_id)
            .mapping
            .get_or_insert_with(|| TargetMapping::Update(UpdateMapping::default()))
    }

    /// Assembles the remote event, excluding targets that are no longer
    /// listened to or whose watch/unwatch requests are still unacknowledged.
    pub fn aggregate(self) -> Aggregation {
        let WatchChangeAggregator {
            snapshot_version,
            listen_targets,
            pending_target_responses,
            target_changes,
            document_updates,
            existence_filters,
        } = self;

        let target_changes = target_changes
            .into_iter()
            .filter(|(target_id, _)| {
                listen_targets.contains_key(target_id)
                    && !pending_target_responses.contains_key(target_id)
            })
            .collect();

        Aggregation {
            remote_event: RemoteEvent {
                snapshot_version,
                target_changes,
                document_updates,
                existence_filter_mismatches: BTreeSet::new(),
            },
            pending_target_responses,
            existence_filters,
        }
    }
}
