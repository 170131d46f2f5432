use crate::model::{Query, SnapshotVersion};

/// Identifier the sync engine assigns to one listen target.
pub type TargetId = i32;

/// Why a target is being listened to. The purpose travels with the watch
/// request so the backend can treat recovery listens differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPurpose {
    /// An ordinary user-initiated listen.
    Listen,
    /// Re-listen issued after the backend's existence filter disagreed with
    /// the local view of the target.
    ExistenceFilterMismatch,
    /// Listen resolving the state of a single document in limbo.
    LimboResolution,
}

impl QueryPurpose {
    /// Wire label attached to non-default listens; `None` for plain listens.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            QueryPurpose::Listen => None,
            QueryPurpose::ExistenceFilterMismatch => Some("existence-filter-mismatch"),
            QueryPurpose::LimboResolution => Some("limbo-document"),
        }
    }
}

/// Everything the remote store tracks about one active listen target.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryData {
    query: Query,
    target_id: TargetId,
    purpose: QueryPurpose,
    snapshot_version: SnapshotVersion,
    resume_token: Option<Vec<u8>>,
}

impl QueryData {
    pub fn new(query: Query, target_id: TargetId, purpose: QueryPurpose) -> Self {
        Self {
            query,
            target_id,
            purpose,
            snapshot_version: SnapshotVersion::NONE,
            resume_token: None,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    pub fn purpose(&self) -> QueryPurpose {
        self.purpose
    }

    pub fn snapshot_version(&self) -> SnapshotVersion {
        self.snapshot_version
    }

    pub fn resume_token(&self) -> Option<&[u8]> {
        self.resume_token.as_deref()
    }

    /// Copy of this target positioned at a newer snapshot.
    pub fn with_snapshot(&self, version: SnapshotVersion, resume_token: Option<Vec<u8>>) -> Self {
        Self {
            query: self.query.clone(),
            target_id: self.target_id,
            purpose: self.purpose,
            snapshot_version: version,
            resume_token,
        }
    }

    /// Copy of this target with a different purpose.
    pub fn with_purpose(&self, purpose: QueryPurpose) -> Self {
        Self {
            query: self.query.clone(),
            target_id: self.target_id,
            purpose,
            snapshot_version: self.snapshot_version,
            resume_token: self.resume_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourcePath, Timestamp};

    fn query_data() -> QueryData {
        let query = Query::at_path(ResourcePath::from_string("notes").unwrap());
        QueryData::new(query, 2, QueryPurpose::Listen)
    }

    #[test]
    fn starts_without_snapshot_state() {
        let data = query_data();
        assert!(data.snapshot_version().is_none());
        assert!(data.resume_token().is_none());
    }

    #[test]
    fn with_snapshot_replaces_position() {
        let version = SnapshotVersion::new(Timestamp::new(7, 0));
        let advanced = query_data().with_snapshot(version, Some(b"tok".to_vec()));
        assert_eq!(advanced.snapshot_version(), version);
        assert_eq!(advanced.resume_token(), Some(&b"tok"[..]));
        assert_eq!(advanced.target_id(), 2);
    }

    #[test]
    fn with_purpose_keeps_snapshot_position() {
        let version = SnapshotVersion::new(Timestamp::new(7, 0));
        let advanced = query_data().with_snapshot(version, Some(b"tok".to_vec()));
        let relisten = advanced.with_purpose(QueryPurpose::ExistenceFilterMismatch);
        assert_eq!(relisten.purpose(), QueryPurpose::ExistenceFilterMismatch);
        assert_eq!(relisten.snapshot_version(), version);
    }
}
