use serde_json::{Map, Value as JsonValue};

use crate::model::document_key::DocumentKey;
use crate::model::snapshot_version::SnapshotVersion;

/// Field payload of a document. DocSync documents are plain JSON objects.
pub type FieldMap = Map<String, JsonValue>;

/// A document known to exist at a specific version.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
    pub fields: FieldMap,
}

impl Document {
    pub fn new(key: DocumentKey, version: SnapshotVersion, fields: FieldMap) -> Self {
        Self {
            key,
            version,
            fields,
        }
    }
}

/// A tombstone: the backend confirmed the document does not exist as of
/// `version`.
#[derive(Clone, Debug, PartialEq)]
pub struct NoDocument {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
}

impl NoDocument {
    pub fn new(key: DocumentKey, version: SnapshotVersion) -> Self {
        Self { key, version }
    }
}

/// Either a live document or a tombstone, as reported by the watch stream.
#[derive(Clone, Debug, PartialEq)]
pub enum MaybeDocument {
    Document(Document),
    NoDocument(NoDocument),
}

impl MaybeDocument {
    pub fn key(&self) -> &DocumentKey {
        match self {
            MaybeDocument::Document(doc) => &doc.key,
            MaybeDocument::NoDocument(doc) => &doc.key,
        }
    }

    pub fn version(&self) -> SnapshotVersion {
        match self {
            MaybeDocument::Document(doc) => doc.version,
            MaybeDocument::NoDocument(doc) => doc.version,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, MaybeDocument::Document(_))
    }
}
