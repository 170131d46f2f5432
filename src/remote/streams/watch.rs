use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{internal_error, DocSyncError, DocSyncResult};
use crate::remote::connection::{StreamKind, StreamingConnection};
use crate::remote::datastore::RetrySettings;
use crate::remote::query_data::{QueryData, TargetId};
use crate::remote::serializer::JsonSerializer;
use crate::remote::streams::persistent::{StreamEvents, StreamRunner};
use crate::remote::streams::{WatchStream, WatchStreamDelegate};
use crate::remote::watch_change::{change_snapshot_version, decode_watch_change};

/// Listen channel over a raw streaming connection.
pub struct PersistentWatchStream {
    runner: Arc<StreamRunner>,
    events: Arc<WatchStreamEvents>,
}

impl PersistentWatchStream {
    pub fn new(
        connection: Arc<dyn StreamingConnection>,
        serializer: JsonSerializer,
        retry: RetrySettings,
    ) -> Self {
        Self {
            runner: Arc::new(StreamRunner::new(
                "watch",
                StreamKind::Watch,
                connection,
                retry,
            )),
            events: Arc::new(WatchStreamEvents {
                serializer,
                delegate: StdMutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl WatchStream for PersistentWatchStream {
    fn start(&self, delegate: Arc<dyn WatchStreamDelegate>) {
        *self.events.delegate.lock().expect("delegate lock") = Some(delegate);
        self.runner.start(Arc::clone(&self.events));
    }

    async fn stop(&self) {
        self.runner.stop().await;
        self.events.delegate.lock().expect("delegate lock").take();
    }

    fn is_started(&self) -> bool {
        self.runner.is_started()
    }

    fn is_open(&self) -> bool {
        self.runner.is_open()
    }

    fn mark_idle(&self) {
        self.runner.mark_idle();
    }

    async fn watch_query(&self, query: &QueryData) -> DocSyncResult<()> {
        let request = encode_watch_request(&self.events.serializer, query);
        let bytes = serde_json::to_vec(&request)
            .map_err(|err| internal_error(format!("Failed to encode watch request: {err}")))?;
        self.runner.send(bytes).await
    }

    async fn unwatch_target(&self, target_id: TargetId) -> DocSyncResult<()> {
        let request = encode_unwatch_request(&self.events.serializer, target_id);
        let bytes = serde_json::to_vec(&request)
            .map_err(|err| internal_error(format!("Failed to encode unwatch request: {err}")))?;
        self.runner.send(bytes).await
    }
}

struct WatchStreamEvents {
    serializer: JsonSerializer,
    delegate: StdMutex<Option<Arc<dyn WatchStreamDelegate>>>,
}

impl WatchStreamEvents {
    fn delegate(&self) -> Option<Arc<dyn WatchStreamDelegate>> {
        self.delegate.lock().expect("delegate lock").clone()
    }
}

#[async_trait]
impl StreamEvents for WatchStreamEvents {
    async fn handle_open(&self) -> DocSyncResult<()> {
        match self.delegate() {
            Some(delegate) => delegate.on_open().await,
            None => Ok(()),
        }
    }

    async fn handle_message(&self, payload: Vec<u8>) -> DocSyncResult<()> {
        let value: JsonValue = serde_json::from_slice(&payload)
            .map_err(|err| internal_error(format!("Failed to decode listen response: {err}")))?;
        match decode_watch_change(&self.serializer, &value)? {
            Some(change) => {
                let snapshot_version = change_snapshot_version(&change);
                match self.delegate() {
                    Some(delegate) => delegate.on_change(change, snapshot_version).await,
                    None => Ok(()),
                }
            }
            None => {
                log::debug!("ignoring unrecognized listen frame");
                Ok(())
            }
        }
    }

    async fn handle_close(&self, error: Option<DocSyncError>) {
        if let Some(delegate) = self.delegate() {
            delegate.on_close(error).await;
        }
    }
}

fn encode_watch_request(serializer: &JsonSerializer, query: &QueryData) -> JsonValue {
    let mut add_target = Map::new();
    add_target.insert("targetId".to_string(), json!(query.target_id()));
    if let Some(token) = query.resume_token() {
        if !token.is_empty() {
            add_target.insert(
                "resumeToken".to_string(),
                json!(BASE64_STANDARD.encode(token)),
            );
        }
    }
    if let JsonValue::Object(payload) = serializer.encode_query_target(query) {
        add_target.extend(payload);
    }

    let mut request = Map::new();
    request.insert(
        "database".to_string(),
        JsonValue::String(serializer.database_name().to_string()),
    );
    request.insert("addTarget".to_string(), JsonValue::Object(add_target));
    if let Some(label) = query.purpose().label() {
        request.insert("labels".to_string(), json!({ "docsync-listen-tags": label }));
    }
    JsonValue::Object(request)
}

fn encode_unwatch_request(serializer: &JsonSerializer, target_id: TargetId) -> JsonValue {
    json!({
        "database": serializer.database_name(),
        "removeTarget": target_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseId, Query, ResourcePath, SnapshotVersion};
    use crate::remote::query_data::QueryPurpose;
    use crate::remote::watch_change::WatchChange;
    use async_lock::Mutex;

    fn serializer() -> JsonSerializer {
        JsonSerializer::new(DatabaseId::new("demo", "(default)"))
    }

    fn collection_target(target_id: TargetId) -> QueryData {
        let query = Query::at_path(ResourcePath::from_string("notes").unwrap());
        QueryData::new(query, target_id, QueryPurpose::Listen)
    }

    #[test]
    fn watch_request_carries_resume_token() {
        let query = collection_target(1).with_snapshot(SnapshotVersion::NONE, Some(b"t1".to_vec()));
        let request = encode_watch_request(&serializer(), &query);
        assert_eq!(
            request["addTarget"]["resumeToken"],
            json!(BASE64_STANDARD.encode(b"t1"))
        );
        assert!(request.get("labels").is_none());
    }

    #[test]
    fn relisten_purpose_is_labelled() {
        let query = collection_target(1).with_purpose(QueryPurpose::ExistenceFilterMismatch);
        let request = encode_watch_request(&serializer(), &query);
        assert_eq!(
            request["labels"]["docsync-listen-tags"],
            "existence-filter-mismatch"
        );
    }

    #[test]
    fn unwatch_request_names_target() {
        let request = encode_unwatch_request(&serializer(), 4);
        assert_eq!(request["removeTarget"], 4);
    }

    #[derive(Default)]
    struct RecordingDelegate {
        changes: Mutex<Vec<WatchChange>>,
    }

    #[async_trait]
    impl WatchStreamDelegate for RecordingDelegate {
        async fn on_open(&self) -> DocSyncResult<()> {
            Ok(())
        }

        async fn on_change(
            &self,
            change: WatchChange,
            _snapshot_version: SnapshotVersion,
        ) -> DocSyncResult<()> {
            self.changes.lock().await.push(change);
            Ok(())
        }

        async fn on_close(&self, _error: Option<DocSyncError>) {}
    }

    #[tokio::test]
    async fn message_handler_decodes_and_forwards() {
        let recording = Arc::new(RecordingDelegate::default());
        let events = Arc::new(WatchStreamEvents {
            serializer: serializer(),
            delegate: StdMutex::new(Some(
                Arc::clone(&recording) as Arc<dyn WatchStreamDelegate>
            )),
        });

        let frame = json!({
            "targetChange": { "targetIds": [1], "targetChangeType": "ADD" }
        });
        events
            .handle_message(serde_json::to_vec(&frame).unwrap())
            .await
            .unwrap();

        assert_eq!(recording.changes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn garbage_frame_is_an_error() {
        let events = Arc::new(WatchStreamEvents {
            serializer: serializer(),
            delegate: StdMutex::new(None),
        });
        let err = events.handle_message(b"not json".to_vec()).await.unwrap_err();
        assert_eq!(err.code_str(), "docsync/internal");
    }
}
