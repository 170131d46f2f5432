use crate::model::document_key::DocumentKey;
use crate::model::resource_path::ResourcePath;

/// Minimal description of a listenable query: a path plus an optional
/// collection-group scope. Filters, ordering and limits are applied by the
/// query engine above this crate and do not affect target bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    path: ResourcePath,
    collection_group: Option<String>,
}

impl Query {
    pub fn at_path(path: ResourcePath) -> Self {
        Self {
            path,
            collection_group: None,
        }
    }

    pub fn collection_group(path: ResourcePath, group: impl Into<String>) -> Self {
        Self {
            path,
            collection_group: Some(group.into()),
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn collection_group_id(&self) -> Option<&str> {
        self.collection_group.as_deref()
    }

    /// A query addressing a single document by key. Such queries have exactly
    /// zero or one results and get dedicated existence-filter handling.
    pub fn is_document_query(&self) -> bool {
        DocumentKey::is_document_path(&self.path) && self.collection_group.is_none()
    }

    pub fn canonical_id(&self) -> String {
        match &self.collection_group {
            Some(group) => format!("{}|cg:{}", self.path.canonical_string(), group),
            None => self.path.canonical_string(),
        }
    }
}
