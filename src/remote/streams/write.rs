use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{internal_error, DocSyncError, DocSyncResult};
use crate::model::SnapshotVersion;
use crate::remote::connection::{StreamKind, StreamingConnection};
use crate::remote::datastore::RetrySettings;
use crate::remote::mutation::{Mutation, MutationResult};
use crate::remote::serializer::JsonSerializer;
use crate::remote::streams::persistent::{StreamEvents, StreamRunner};
use crate::remote::streams::{WriteStream, WriteStreamDelegate};

/// Write channel over a raw streaming connection.
pub struct PersistentWriteStream {
    runner: Arc<StreamRunner>,
    events: Arc<WriteStreamEvents>,
}

impl PersistentWriteStream {
    pub fn new(
        connection: Arc<dyn StreamingConnection>,
        serializer: JsonSerializer,
        retry: RetrySettings,
    ) -> Self {
        Self {
            runner: Arc::new(StreamRunner::new(
                "write",
                StreamKind::Write,
                connection,
                retry,
            )),
            events: Arc::new(WriteStreamEvents {
                serializer,
                delegate: StdMutex::new(None),
                handshake_complete: AtomicBool::new(false),
                stream_token: StdMutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl WriteStream for PersistentWriteStream {
    fn start(&self, delegate: Arc<dyn WriteStreamDelegate>) {
        // Each session negotiates its handshake anew; the token survives so
        // the backend can resume the previous session's write ordering.
        self.events
            .handshake_complete
            .store(false, Ordering::SeqCst);
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

    fn handshake_complete(&self) -> bool {
        self.events.handshake_complete.load(Ordering::SeqCst)
    }

    fn last_stream_token(&self) -> Option<Vec<u8>> {
        self.events.stream_token.lock().expect("token lock").clone()
    }

    fn set_last_stream_token(&self, token: Option<Vec<u8>>) {
        *self.events.stream_token.lock().expect("token lock") = token;
    }

    fn mark_idle(&self) {
        self.runner.mark_idle();
    }

    fn inhibit_backoff(&self) {
        self.runner.inhibit_backoff();
    }

    async fn write_handshake(&self) -> DocSyncResult<()> {
        let request = encode_handshake_request(&self.events.serializer);
        let bytes = serde_json::to_vec(&request)
            .map_err(|err| internal_error(format!("Failed to encode handshake: {err}")))?;
        self.runner.send(bytes).await
    }

    async fn write_mutations(&self, mutations: &[Mutation]) -> DocSyncResult<()> {
        if !self.handshake_complete() {
            return Err(internal_error(
                "Cannot write mutations before handshake completes",
            ));
        }
        let token = self.last_stream_token();
        let request = encode_write_request(&self.events.serializer, token.as_deref(), mutations);
        let bytes = serde_json::to_vec(&request)
            .map_err(|err| internal_error(format!("Failed to encode write request: {err}")))?;
        self.runner.send(bytes).await
    }
}

struct WriteStreamEvents {
    serializer: JsonSerializer,
    delegate: StdMutex<Option<Arc<dyn WriteStreamDelegate>>>,
    handshake_complete: AtomicBool,
    stream_token: StdMutex<Option<Vec<u8>>>,
}

impl WriteStreamEvents {
    fn delegate(&self) -> Option<Arc<dyn WriteStreamDelegate>> {
        self.delegate.lock().expect("delegate lock").clone()
    }
}

#[async_trait]
impl StreamEvents for WriteStreamEvents {
    async fn handle_open(&self) -> DocSyncResult<()> {
        match self.delegate() {
            Some(delegate) => delegate.on_open().await,
            None => Ok(()),
        }
    }

    async fn handle_message(&self, payload: Vec<u8>) -> DocSyncResult<()> {
        let value: JsonValue = serde_json::from_slice(&payload)
            .map_err(|err| internal_error(format!("Failed to decode write response: {err}")))?;
        let response = decode_write_response(&self.serializer, &value)?;

        *self.stream_token.lock().expect("token lock") = Some(response.stream_token);
        let first_response = !self.handshake_complete.swap(true, Ordering::SeqCst);

        match self.delegate() {
            Some(delegate) if first_response => delegate.on_handshake_complete().await,
            Some(delegate) => {
                delegate
                    .on_response(response.commit_version, response.results)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn handle_close(&self, error: Option<DocSyncError>) {
        if let Some(delegate) = self.delegate() {
            delegate.on_close(error).await;
        }
    }
}

#[derive(Debug)]
pub(crate) struct WriteResponse {
    pub stream_token: Vec<u8>,
    pub commit_version: SnapshotVersion,
    pub results: Vec<MutationResult>,
}

pub(crate) fn encode_handshake_request(serializer: &JsonSerializer) -> JsonValue {
    json!({ "database": serializer.database_name() })
}

pub(crate) fn encode_write_request(
    serializer: &JsonSerializer,
    stream_token: Option<&[u8]>,
    mutations: &[Mutation],
) -> JsonValue {
    let writes: Vec<JsonValue> = mutations
        .iter()
        .map(|mutation| serializer.encode_mutation(mutation))
        .collect();

    let mut request = Map::new();
    request.insert(
        "database".to_string(),
        JsonValue::String(serializer.database_name().to_string()),
    );
    if let Some(token) = stream_token {
        request.insert(
            "streamToken".to_string(),
            json!(BASE64_STANDARD.encode(token)),
        );
    }
    request.insert("writes".to_string(), JsonValue::Array(writes));
    JsonValue::Object(request)
}

pub(crate) fn decode_write_response(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<WriteResponse> {
    let stream_token_str = value
        .get("streamToken")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| internal_error("write response missing streamToken"))?;
    let stream_token = BASE64_STANDARD
        .decode(stream_token_str)
        .map_err(|err| internal_error(format!("Invalid streamToken: {err}")))?;

    let commit_version = value
        .get("commitTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version(timestamp))
        .transpose()?
        .unwrap_or(SnapshotVersion::NONE);

    let results = value
        .get("writeResults")
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| decode_write_result(serializer, entry))
                .collect::<DocSyncResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(WriteResponse {
        stream_token,
        commit_version,
        results,
    })
}

fn decode_write_result(
    serializer: &JsonSerializer,
    value: &JsonValue,
) -> DocSyncResult<MutationResult> {
    let version = value
        .get("updateTime")
        .and_then(JsonValue::as_str)
        .map(|timestamp| serializer.decode_version(timestamp))
        .transpose()?;
    Ok(MutationResult { version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseId, DocumentKey};
    use async_lock::Mutex;

    fn serializer() -> JsonSerializer {
        JsonSerializer::new(DatabaseId::new("demo", "(default)"))
    }

    fn delete(path: &str) -> Mutation {
        Mutation::Delete {
            key: DocumentKey::from_string(path).unwrap(),
        }
    }

    #[test]
    fn write_request_includes_token_when_present() {
        let request = encode_write_request(&serializer(), Some(b"tok"), &[delete("notes/n1")]);
        assert_eq!(request["streamToken"], json!(BASE64_STANDARD.encode(b"tok")));
        assert_eq!(request["writes"].as_array().unwrap().len(), 1);

        let bare = encode_write_request(&serializer(), None, &[delete("notes/n1")]);
        assert!(bare.get("streamToken").is_none());
    }

    #[test]
    fn decodes_write_response_fields() {
        let value = json!({
            "streamToken": BASE64_STANDARD.encode(b"next"),
            "commitTime": "2023-04-01T00:00:09Z",
            "writeResults": [
                { "updateTime": "2023-04-01T00:00:09Z" },
                {}
            ]
        });
        let response = decode_write_response(&serializer(), &value).unwrap();
        assert_eq!(response.stream_token, b"next");
        assert!(!response.commit_version.is_none());
        assert_eq!(response.results.len(), 2);
        assert!(response.results[0].version.is_some());
        assert!(response.results[1].version.is_none());
    }

    #[test]
    fn response_without_token_is_invalid() {
        let err = decode_write_response(&serializer(), &json!({})).unwrap_err();
        assert_eq!(err.code_str(), "docsync/internal");
    }

    #[derive(Default)]
    struct RecordingDelegate {
        handshakes: Mutex<usize>,
        responses: Mutex<Vec<(SnapshotVersion, Vec<MutationResult>)>>,
    }

    #[async_trait]
    impl WriteStreamDelegate for RecordingDelegate {
        async fn on_open(&self) -> DocSyncResult<()> {
            Ok(())
        }

        async fn on_handshake_complete(&self) -> DocSyncResult<()> {
            *self.handshakes.lock().await += 1;
            Ok(())
        }

        async fn on_response(
            &self,
            commit_version: SnapshotVersion,
            results: Vec<MutationResult>,
        ) -> DocSyncResult<()> {
            self.responses.lock().await.push((commit_version, results));
            Ok(())
        }

        async fn on_close(&self, _error: Option<DocSyncError>) {}
    }

    #[tokio::test]
    async fn first_response_completes_handshake_later_ones_ack_writes() {
        let recording = Arc::new(RecordingDelegate::default());
        let events = Arc::new(WriteStreamEvents {
            serializer: serializer(),
            delegate: StdMutex::new(Some(
                Arc::clone(&recording) as Arc<dyn WriteStreamDelegate>
            )),
            handshake_complete: AtomicBool::new(false),
            stream_token: StdMutex::new(None),
        });

        let handshake_response = json!({ "streamToken": BASE64_STANDARD.encode(b"t0") });
        events
            .handle_message(serde_json::to_vec(&handshake_response).unwrap())
            .await
            .unwrap();
        assert_eq!(*recording.handshakes.lock().await, 1);
        assert_eq!(
            *events.stream_token.lock().unwrap(),
            Some(b"t0".to_vec())
        );

        let write_response = json!({
            "streamToken": BASE64_STANDARD.encode(b"t1"),
            "commitTime": "2023-04-01T00:00:09Z",
            "writeResults": [{}]
        });
        events
            .handle_message(serde_json::to_vec(&write_response).unwrap())
            .await
            .unwrap();
        assert_eq!(recording.responses.lock().await.len(), 1);
        assert_eq!(
            *events.stream_token.lock().unwrap(),
            Some(b"t1".to_vec())
        );
    }
}
