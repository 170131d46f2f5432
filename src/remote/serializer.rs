use serde_json::{json, Map, Value as JsonValue};

use crate::error::{invalid_argument, DocSyncResult};
use crate::model::{DatabaseId, DocumentKey, ResourcePath, SnapshotVersion, Timestamp};
use crate::remote::mutation::Mutation;
use crate::remote::query_data::QueryData;

/// Translates between model types and the JSON frames exchanged on the
/// streams. One instance is shared by both stream directions; it is cheap to
/// clone.
#[derive(Clone, Debug)]
pub struct JsonSerializer {
    database_id: DatabaseId,
    database_name: String,
}

impl JsonSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        let database_name = format!(
            "projects/{}/databases/{}",
            database_id.project_id(),
            database_id.database()
        );
        Self {
            database_id,
            database_name,
        }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    /// `projects/{project}/databases/{database}`
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn encode_document_name(&self, key: &DocumentKey) -> String {
        format!(
            "{}/documents/{}",
            self.database_name,
            key.path().canonical_string()
        )
    }

    pub fn document_key_from_name(&self, name: &str) -> DocSyncResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.database_name);
        let relative = name
            .strip_prefix(&prefix)
            .ok_or_else(|| invalid_argument(format!("Document name {name:?} is foreign")))?;
        DocumentKey::from_string(relative)
    }

    pub fn encode_timestamp(&self, timestamp: Timestamp) -> String {
        timestamp.to_rfc3339()
    }

    pub fn decode_timestamp(&self, value: &str) -> DocSyncResult<Timestamp> {
        Timestamp::from_rfc3339(value)
    }

    pub fn decode_version(&self, value: &str) -> DocSyncResult<SnapshotVersion> {
        Ok(SnapshotVersion::new(self.decode_timestamp(value)?))
    }

    /// Target payload of a watch request: a single document lookup or a
    /// (collection-group) query rooted at the target path.
    pub fn encode_query_target(&self, data: &QueryData) -> JsonValue {
        let query = data.query();
        if query.is_document_query() {
            let name = format!(
                "{}/documents/{}",
                self.database_name,
                query.path().canonical_string()
            );
            return json!({ "documents": { "documents": [name] } });
        }

        let (parent_path, from) = match query.collection_group_id() {
            Some(group) => (
                query.path().clone(),
                json!([{ "collectionId": group, "allDescendants": true }]),
            ),
            None => (
                query.path().without_last(),
                json!([{ "collectionId": query.path().last_segment().unwrap_or_default() }]),
            ),
        };
        let parent = self.encode_parent(&parent_path);
        json!({
            "query": {
                "parent": parent,
                "structuredQuery": { "from": from }
            }
        })
    }

    pub fn encode_mutation(&self, mutation: &Mutation) -> JsonValue {
        match mutation {
            Mutation::Set { key, fields } => json!({
                "update": {
                    "name": self.encode_document_name(key),
                    "fields": JsonValue::Object(fields.clone())
                }
            }),
            Mutation::Patch {
                key,
                fields,
                field_mask,
            } => json!({
                "update": {
                    "name": self.encode_document_name(key),
                    "fields": JsonValue::Object(fields.clone())
                },
                "updateMask": { "fieldPaths": field_mask }
            }),
            Mutation::Delete { key } => json!({
                "delete": self.encode_document_name(key)
            }),
        }
    }

    pub fn decode_fields(&self, value: Option<&JsonValue>) -> Map<String, JsonValue> {
        value
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn encode_parent(&self, path: &ResourcePath) -> String {
        if path.is_empty() {
            format!("{}/documents", self.database_name)
        } else {
            format!("{}/documents/{}", self.database_name, path.canonical_string())
        }
    }
}
