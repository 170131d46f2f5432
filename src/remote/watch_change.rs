use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{
    aborted, deadline_exceeded, failed_precondition, internal_error, invalid_argument, not_found,
    permission_denied, resource_exhausted, unauthenticated, unavailable, DocSyncError,
    DocSyncResult,
};
use crate::model::{Document, MaybeDocument, NoDocument, SnapshotVersion};
use crate::remote::query_data::TargetId;
use crate::remote::serializer::JsonSerializer;

/// One incremental message from the watch stream.
#[derive(Debug, Clone)]
pub enum WatchChange {
    TargetChange(WatchTargetChange),
    Document(DocumentWatchChange),
    ExistenceFilter(ExistenceFilterWatchChange),
}

/// Target-level state transition, optionally carrying a resume token and the
/// read time at which the transition is consistent.
#[derive(Debug, Clone)]
pub struct WatchTargetChange {
    pub state: TargetChangeState,
    pub target_ids: Vec<TargetId>,
    pub resume_token: Option<Vec<u8>>,
    pub read_time: SnapshotVersion,
    pub cause: Option<DocSyncError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChangeState {
    NoChange,
    Added,
    Removed,
    Current,
    Reset,
}

/// A document entering or leaving the result sets of some targets. A
/// tombstone reports a confirmed deletion; `new_document == None` means the
/// document merely left the listed targets.
#[derive(Debug, Clone)]
pub struct DocumentWatchChange {
    pub updated_target_ids: Vec<TargetId>,
    pub removed_target_ids: Vec<TargetId>,
    pub key: crate::model::DocumentKey,
    pub new_document: Option<MaybeDocument>,
}

/// Backend assertion about the cardinality of a target's result set.
#[derive(Debug, Clone, Copy)]
pub struct ExistenceFilterWatchChange {
    pub target_id: TargetId,
    pub filter: ExistenceFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistenceFilter {
    pub count: i32,
}

/// The consistency point a change carries, if any. Only target changes and
/// confirmed deletions name a read time; plain document updates float until
/// the next global consistency marker.
pub fn change_snapshot_version(change: &WatchChange) -> SnapshotVersion {
    match change {
        WatchChange::TargetChange(target_change) => target_change.read_time,
        WatchChange::Document(doc_change) => match &doc_change.new_document {
            Some(MaybeDocument::NoDocument(tombstone)) => tombstone.version,
            _ => SnapshotVersion::NONE,
        },
        WatchChange::ExistenceFilter(_) => SnapshotVersion::NONE,
    }
}

#[derive(Debug, Deserialize)]
struct StatusCause {
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes one listen response frame. Returns `None` for frame types this
/// client does not consume.
pub fn decode_watch_change(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<Option<WatchChange>> {
    if let Some(target_change) = value.get("targetChange") {
        return decode_target_change(serializer, target_change).map(Some);
    }

    if let Some(document_change) = value.get("documentChange") {
        return decode_document_change(serializer, document_change).map(Some);
    }

    if let Some(document_delete) = value.get("documentDelete") {
        return decode_document_delete(serializer, document_delete).map(Some);
    }

    if let Some(document_remove) = value.get("documentRemove") {
        return decode_document_remove(serializer, document_remove).map(Some);
    }

    if let Some(filter) = value.get("filter") {
        return decode_filter_change(filter).map(Some);
    }

    Ok(None)
}

fn decode_target_change(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<WatchChange> {
    let target_ids = numeric_array(value.get("targetIds"));

    let resume_token = value
        .get("resumeToken")
        .and_then(JsonValue::as_str)
        .and_then(|token| BASE64_STANDARD.decode(token).ok());

    let read_time = value
        .get("readTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);

    let state = value
        .get("targetChangeType")
        .and_then(JsonValue::as_str)
        .map(target_state_from_str)
        .unwrap_or(TargetChangeState::NoChange);

    let cause = value
        .get("cause")
        .map(|cause| serde_json::from_value::<StatusCause>(cause.clone()))
        .transpose()
        .map_err(|err| internal_error(format!("Failed to decode watch cause: {err}")))?
        .map(|cause| map_rpc_status(cause.code, cause.message));

    Ok(WatchChange::TargetChange(WatchTargetChange {
        state,
        target_ids,
        resume_token,
        read_time,
        cause,
    }))
}

fn decode_document_change(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<WatchChange> {
    let updated_target_ids = numeric_array(value.get("targetIds"));
    let removed_target_ids = numeric_array(value.get("removedTargetIds"));

    let document = value
        .get("document")
        .ok_or_else(|| invalid_argument("documentChange missing document"))?;
    let name = document
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("documentChange document missing name"))?;
    let key = serializer.document_key_from_name(name)?;
    let version = document
        .get("updateTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);
    let fields = serializer.decode_fields(document.get("fields"));

    Ok(WatchChange::Document(DocumentWatchChange {
        updated_target_ids,
        removed_target_ids,
        key: key.clone(),
        new_document: Some(MaybeDocument::Document(Document::new(key, version, fields))),
    }))
}

fn decode_document_delete(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<WatchChange> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("documentDelete missing document"))?;
    let key = serializer.document_key_from_name(name)?;
    let read_time = value
        .get("readTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);
    let removed_target_ids = numeric_array(value.get("removedTargetIds"));

    Ok(WatchChange::Document(DocumentWatchChange {
        updated_target_ids: Vec::new(),
        removed_target_ids,
        key: key.clone(),
        new_document: Some(MaybeDocument::NoDocument(NoDocument::new(key, read_time))),
    }))
}

fn decode_document_remove(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<WatchChange> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("documentRemove missing document"))?;
    let key = serializer.document_key_from_name(name)?;
    let removed_target_ids = numeric_array(value.get("removedTargetIds"));

    // A remove only detaches the document from targets; unlike a delete it
    // carries no statement about the document's continued existence.
    Ok(WatchChange::Document(DocumentWatchChange {
        updated_target_ids: Vec::new(),
        removed_target_ids,
        key,
        new_document: None,
    }))
}

fn decode_filter_change(value: &JsonValue) -> DocSyncResult<WatchChange> {
    let target_id = value
        .get("targetId")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| invalid_argument("filter missing targetId"))? as TargetId;
    let count = value
        .get("count")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| invalid_argument("filter missing count"))? as i32;
    Ok(WatchChange::ExistenceFilter(ExistenceFilterWatchChange {
        target_id,
        filter: ExistenceFilter { count },
    }))
}

fn numeric_array(value: Option<&JsonValue>) -> Vec<TargetId> {
    value
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_i64().map(|value| value as TargetId))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn target_state_from_str(value: &str) -> TargetChangeState {
    match value {
        "NO_CHANGE" => TargetChangeState::NoChange,
        "ADD" => TargetChangeState::Added,
        "REMOVE" => TargetChangeState::Removed,
        "CURRENT" => TargetChangeState::Current,
        "RESET" => TargetChangeState::Reset,
        _ => TargetChangeState::NoChange,
    }
}

pub(crate) fn map_rpc_status(code: i32, message: Option<String>) -> DocSyncError {
    let message = message.unwrap_or_else(|| "watch stream error".to_string());
    match code {
        1 => crate::error::cancelled(message),
        3 => invalid_argument(message),
        4 => deadline_exceeded(message),
        5 => not_found(message),
        6 => crate::error::already_exists(message),
        7 => permission_denied(message),
        8 => resource_exhausted(message),
        9 => failed_precondition(message),
        10 => aborted(message),
        13 => internal_error(message),
        14 => unavailable(message),
        16 => unauthenticated(message),
        _ => internal_error(message),
    }
}
