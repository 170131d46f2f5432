use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{internal_error, unavailable, DocSyncError, DocSyncErrorCode, DocSyncResult};
use crate::model::SnapshotVersion;
use crate::remote::connection::StreamingConnection;
use crate::remote::mutation::{Mutation, MutationResult};
use crate::remote::serializer::JsonSerializer;
use crate::remote::streams::write::{
    decode_write_response, encode_handshake_request, encode_write_request,
};
use crate::remote::streams::{
    PersistentWatchStream, PersistentWriteStream, WatchStream, WriteStream,
};

/// Reconnect policy for the persistent streams.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 1.5,
        }
    }
}

/// Factory for the two persistent streams plus the error classification the
/// write pipeline relies on.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    fn create_watch_stream(&self) -> Arc<dyn WatchStream>;
    fn create_write_stream(&self) -> Arc<dyn WriteStream>;

    /// Whether retrying the same write can ever succeed.
    fn is_permanent_write_error(&self, error: &DocSyncError) -> bool {
        error.code.is_permanent_write_error()
    }

    fn is_aborted(&self, error: &DocSyncError) -> bool {
        error.code == DocSyncErrorCode::Aborted
    }

    /// One-shot atomic commit outside the write pipeline; used by
    /// transactions.
    async fn commit(
        &self,
        mutations: Vec<Mutation>,
    ) -> DocSyncResult<(SnapshotVersion, Vec<MutationResult>)>;
}

/// Production datastore: builds streams over a raw streaming connection.
pub struct StreamingDatastore {
    connection: Arc<dyn StreamingConnection>,
    serializer: JsonSerializer,
    retry: RetrySettings,
}

impl StreamingDatastore {
    pub fn new(connection: Arc<dyn StreamingConnection>, serializer: JsonSerializer) -> Self {
        Self {
            connection,
            serializer,
            retry: RetrySettings::default(),
        }
    }

    pub fn with_retry_settings(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    async fn next_frame(
        &self,
        raw: &Arc<dyn crate::remote::connection::RawStream>,
    ) -> DocSyncResult<JsonValue> {
        match raw.next().await {
            Some(Ok(payload)) => serde_json::from_slice(&payload)
                .map_err(|err| internal_error(format!("Failed to decode commit response: {err}"))),
            Some(Err(err)) => Err(err),
            None => Err(unavailable("write stream closed during commit")),
        }
    }
}

#[async_trait]
impl Datastore for StreamingDatastore {
    fn create_watch_stream(&self) -> Arc<dyn WatchStream> {
        Arc::new(PersistentWatchStream::new(
            Arc::clone(&self.connection),
            self.serializer.clone(),
            self.retry.clone(),
        ))
    }

    fn create_write_stream(&self) -> Arc<dyn WriteStream> {
        Arc::new(PersistentWriteStream::new(
            Arc::clone(&self.connection),
            self.serializer.clone(),
            self.retry.clone(),
        ))
    }

    async fn commit(
        &self,
        mutations: Vec<Mutation>,
    ) -> DocSyncResult<(SnapshotVersion, Vec<MutationResult>)> {
        let raw = self.connection.open_write_stream().await?;

        let handshake = serde_json::to_vec(&encode_handshake_request(&self.serializer))
            .map_err(|err| internal_error(format!("Failed to encode handshake: {err}")))?;
        raw.send(handshake).await?;
        let handshake_response = self.next_frame(&raw).await?;
        let session = decode_write_response(&self.serializer, &handshake_response)?;

        let request = encode_write_request(
            &self.serializer,
            Some(session.stream_token.as_slice()),
            &mutations,
        );
        let bytes = serde_json::to_vec(&request)
            .map_err(|err| internal_error(format!("Failed to encode commit: {err}")))?;
        raw.send(bytes).await?;
        let commit_response = self.next_frame(&raw).await?;
        let response = decode_write_response(&self.serializer, &commit_response)?;
        let _ = raw.close().await;

        Ok((response.commit_version, response.results))
    }
}
