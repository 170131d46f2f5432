use crate::model::timestamp::Timestamp;

/// Logical read time assigned by the backend to a consistent view of the
/// database. Versions are totally ordered and non-decreasing across the
/// lifetime of a watch stream.
/// The default is [`SnapshotVersion::NONE`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotVersion(Timestamp);

impl SnapshotVersion {
    /// Sentinel for "no version known"; smaller than every real version.
    pub const NONE: SnapshotVersion = SnapshotVersion(Timestamp {
        seconds: 0,
        nanos: 0,
    });

    pub fn new(timestamp: Timestamp) -> Self {
        Self(timestamp)
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn timestamp(&self) -> Timestamp {
        self.0
    }
}

impl From<Timestamp> for SnapshotVersion {
    fn from(timestamp: Timestamp) -> Self {
        Self::new(timestamp)
    }
}
