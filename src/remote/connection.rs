use std::sync::Arc;

use async_lock::Mutex;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};

use crate::error::{unavailable, DocSyncResult};

pub type ConnectionFuture<'a, T> = futures::future::BoxFuture<'a, T>;

pub(crate) fn box_connection_future<'a, F, T>(future: F) -> ConnectionFuture<'a, T>
where
    F: std::future::Future<Output = T> + Send + 'a,
{
    future.boxed()
}

/// Which of the two long-lived channels a stream belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Watch,
    Write,
}

/// One bidirectional byte stream. Frames are opaque to the transport.
pub trait RawStream: Send + Sync + 'static {
    fn send(&self, payload: Vec<u8>) -> ConnectionFuture<'_, DocSyncResult<()>>;
    fn next(&self) -> ConnectionFuture<'_, Option<DocSyncResult<Vec<u8>>>>;
    fn close(&self) -> ConnectionFuture<'_, DocSyncResult<()>>;
}

/// Transport seam: opens raw streams toward the backend. Implementations
/// handle connection establishment and authentication; retry policy lives
/// above in the persistent streams.
pub trait StreamingConnection: Send + Sync + 'static {
    fn open_watch_stream(&self) -> ConnectionFuture<'_, DocSyncResult<Arc<dyn RawStream>>>;
    fn open_write_stream(&self) -> ConnectionFuture<'_, DocSyncResult<Arc<dyn RawStream>>>;
}

/// Creates a linked in-process connection pair: the client half plugs into a
/// [`StreamingConnection`] consumer, the backend half lets a test or demo
/// script the server side.
pub fn in_memory_pair() -> (Arc<InMemoryConnection>, InMemoryBackend) {
    let (accept_tx, accept_rx) = mpsc::unbounded();
    (
        Arc::new(InMemoryConnection { accept_tx }),
        InMemoryBackend {
            accept_rx: Mutex::new(accept_rx),
        },
    )
}

pub struct InMemoryConnection {
    accept_tx: mpsc::UnboundedSender<BackendStream>,
}

impl InMemoryConnection {
    fn open(&self, kind: StreamKind) -> DocSyncResult<Arc<dyn RawStream>> {
        let (to_backend_tx, to_backend_rx) = mpsc::unbounded();
        let (to_client_tx, to_client_rx) = mpsc::unbounded();

        let backend = BackendStream {
            kind,
            to_client: to_client_tx,
            from_client: Mutex::new(to_backend_rx),
        };
        self.accept_tx
            .unbounded_send(backend)
            .map_err(|_| unavailable("backend is gone"))?;

        Ok(Arc::new(InMemoryStream {
            to_backend: to_backend_tx,
            from_backend: Mutex::new(to_client_rx),
        }))
    }
}

impl StreamingConnection for InMemoryConnection {
    fn open_watch_stream(&self) -> ConnectionFuture<'_, DocSyncResult<Arc<dyn RawStream>>> {
        let result = self.open(StreamKind::Watch);
        box_connection_future(async move { result })
    }

    fn open_write_stream(&self) -> ConnectionFuture<'_, DocSyncResult<Arc<dyn RawStream>>> {
        let result = self.open(StreamKind::Write);
        box_connection_future(async move { result })
    }
}

struct InMemoryStream {
    to_backend: mpsc::UnboundedSender<Vec<u8>>,
    from_backend: Mutex<mpsc::UnboundedReceiver<DocSyncResult<Vec<u8>>>>,
}

impl RawStream for InMemoryStream {
    fn send(&self, payload: Vec<u8>) -> ConnectionFuture<'_, DocSyncResult<()>> {
        let result = self
            .to_backend
            .unbounded_send(payload)
            .map_err(|_| unavailable("stream closed"));
        box_connection_future(async move { result })
    }

    fn next(&self) -> ConnectionFuture<'_, Option<DocSyncResult<Vec<u8>>>> {
        box_connection_future(async move { self.from_backend.lock().await.next().await })
    }

    fn close(&self) -> ConnectionFuture<'_, DocSyncResult<()>> {
        self.to_backend.close_channel();
        box_connection_future(async move { Ok(()) })
    }
}

/// Backend half of an in-memory stream.
pub struct InMemoryBackend {
    accept_rx: Mutex<mpsc::UnboundedReceiver<BackendStream>>,
}

impl InMemoryBackend {
    /// The next stream a client opened, in open order.
    pub async fn accept(&self) -> Option<BackendStream> {
        self.accept_rx.lock().await.next().await
    }
}

pub struct BackendStream {
    kind: StreamKind,
    to_client: mpsc::UnboundedSender<DocSyncResult<Vec<u8>>>,
    from_client: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl BackendStream {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The next frame the client sent, `None` once the client closed.
    pub async fn next(&self) -> Option<Vec<u8>> {
        self.from_client.lock().await.next().await
    }

    pub fn send(&self, payload: Vec<u8>) -> DocSyncResult<()> {
        self.to_client
            .unbounded_send(Ok(payload))
            .map_err(|_| unavailable("client is gone"))
    }

    /// Delivers a terminal error to the client and closes the stream.
    pub fn fail(&self, error: crate::error::DocSyncError) {
        let _ = self.to_client.unbounded_send(Err(error));
        self.to_client.close_channel();
    }

    pub fn close(&self) {
        self.to_client.close_channel();
    }
}
