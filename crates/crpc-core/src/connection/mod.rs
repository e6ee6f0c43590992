//! Connection abstraction with half-duplex close semantics.
//!
//! A connection owns a byte (or value) source/sink pair and relays each
//! direction through one cancellable pipe task:
//!
//! - the caller-supplied source is relayed into the exposed source queue;
//! - the exposed sink queue is relayed into the caller-supplied sink.
//!
//! Each pipe settles its direction's status cell when it completes
//! (success) or fails (error with a reason). The aggregate status settles
//! exactly once, only after both directions have settled, and surfaces the
//! first error found. `abort` cancels both pipes cooperatively; a
//! direction that already settled keeps its original outcome.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::{SINK_QUEUE_CAPACITY, SOURCE_QUEUE_CAPACITY};
use crate::error::{Error, Result};
use crate::status::{CloseStatus, StatusCell};

mod sink;

pub use sink::{ChannelSink, ItemSink};

/// Immutable string-keyed connection metadata, fixed at creation.
pub type Metadata = HashMap<String, String>;

/// Options for building a [`Connection`].
#[derive(Debug, Default)]
pub struct ConnectionOptions {
    /// Connection id; generated when absent.
    pub id: Option<String>,
    /// Metadata visible on both ends.
    pub metadata: Metadata,
    /// Exposed source queue capacity (0 means default).
    pub source_capacity: usize,
    /// Exposed sink queue capacity (0 means default).
    pub sink_capacity: usize,
}

impl ConnectionOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Shared per-connection state: direction status cells plus the
/// cancellation tokens driving cooperative abort.
#[derive(Debug)]
struct Shared {
    source_status: StatusCell,
    sink_status: StatusCell,
    status: StatusCell,
    cancel: CancellationToken,
    source_cancel: CancellationToken,
    sink_cancel: CancellationToken,
}

impl Shared {
    fn new() -> Arc<Self> {
        let cancel = CancellationToken::new();
        Arc::new(Self {
            source_status: StatusCell::new(),
            sink_status: StatusCell::new(),
            status: StatusCell::new(),
            source_cancel: cancel.child_token(),
            sink_cancel: cancel.child_token(),
            cancel,
        })
    }
}

/// A bidirectional channel: a consumer-driven source of `I` values and a
/// producer-driven sink of `O` values, each independently closable.
#[derive(Debug)]
pub struct Connection<I, O> {
    id: String,
    metadata: Arc<Metadata>,
    reader: ConnectionReader<I>,
    writer: ConnectionWriter<O>,
    control: ConnectionControl,
}

impl<I, O> Connection<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Build a connection over a caller-supplied source stream and sink.
    ///
    /// Spawns the two relay pipes and the aggregate status watcher.
    pub fn new<S, K>(source: S, sink: K, options: ConnectionOptions) -> Self
    where
        S: Stream<Item = Result<I>> + Send + 'static,
        K: ItemSink<O> + 'static,
    {
        let id = options
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let source_capacity = if options.source_capacity == 0 {
            SOURCE_QUEUE_CAPACITY
        } else {
            options.source_capacity
        };
        let sink_capacity = if options.sink_capacity == 0 {
            SINK_QUEUE_CAPACITY
        } else {
            options.sink_capacity
        };

        let (source_tx, source_rx) = mpsc::channel(source_capacity);
        let (sink_tx, sink_rx) = mpsc::channel(sink_capacity);
        let shared = Shared::new();

        tokio::spawn(relay_source(source, source_tx, shared.clone()));
        tokio::spawn(relay_sink(sink_rx, sink, shared.clone()));
        tokio::spawn(settle_aggregate(shared.clone()));

        Self {
            id,
            metadata: Arc::new(options.metadata),
            reader: ConnectionReader {
                rx: source_rx,
                shared: shared.clone(),
            },
            writer: ConnectionWriter {
                tx: Some(sink_tx),
                shared: shared.clone(),
            },
            control: ConnectionControl { shared },
        }
    }
}

impl<I, O> Connection<I, O> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Receive the next value from the exposed source.
    ///
    /// Returns `None` once the source direction has ended and all buffered
    /// values were consumed.
    pub async fn recv(&mut self) -> Option<I> {
        self.reader.recv().await
    }

    /// Write a value into the exposed sink, suspending on backpressure.
    ///
    /// Fails synchronously with [`Error::ConnectionClosed`] after
    /// [`finish`](Self::finish) or once the sink direction is gone.
    pub async fn send(&self, item: O) -> Result<()> {
        self.writer.send(item).await
    }

    /// Half-close the sink direction: flush queued writes, close the
    /// downstream sink, and settle the sink status with success. The
    /// source direction is untouched.
    pub fn finish(&mut self) {
        self.writer.finish();
    }

    /// Gracefully close both directions.
    ///
    /// The sink is finished (so queued writes still flush); the source is
    /// settled successful and its pipe cancelled.
    pub fn close(&mut self) {
        self.writer.finish();
        self.control.shared.source_status.settle(CloseStatus::Success);
        self.control.shared.source_cancel.cancel();
    }

    /// Cooperatively cancel both pipes. Any direction not yet settled
    /// resolves with an "operation aborted" error.
    pub fn abort(&self) {
        self.control.abort();
    }

    /// Await the aggregate status. Settles only after both directions.
    pub async fn status(&self) -> CloseStatus {
        self.control.status().await
    }

    /// Await settlement of the source direction.
    pub async fn source_closed(&self) -> CloseStatus {
        self.control.source_closed().await
    }

    /// Await settlement of the sink direction.
    pub async fn sink_closed(&self) -> CloseStatus {
        self.control.sink_closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    pub fn is_source_closed(&self) -> bool {
        self.control.is_source_closed()
    }

    pub fn is_sink_closed(&self) -> bool {
        self.control.is_sink_closed()
    }

    /// Clonable control handle (abort and status observation).
    pub fn control(&self) -> ConnectionControl {
        self.control.clone()
    }

    /// Clonable send-only handle onto the exposed sink.
    pub fn sink(&self) -> Result<ConnectionSink<O>> {
        self.writer.handle()
    }

    /// Split into independently owned reader, writer, and control parts.
    pub fn into_split(self) -> (ConnectionReader<I>, ConnectionWriter<O>, ConnectionControl) {
        (self.reader, self.writer, self.control)
    }
}

/// Owned consumer half of a connection's source.
///
/// Dropping the reader cancels the source pipe: a connection whose
/// consumer goes away without a graceful close counts as aborted.
#[derive(Debug)]
pub struct ConnectionReader<I> {
    rx: mpsc::Receiver<I>,
    shared: Arc<Shared>,
}

impl<I> ConnectionReader<I> {
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }
}

impl<I> Stream for ConnectionReader<I> {
    type Item = I;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<I>> {
        self.rx.poll_recv(cx)
    }
}

impl<I> Drop for ConnectionReader<I> {
    fn drop(&mut self) {
        self.shared.source_cancel.cancel();
    }
}

/// Owned producer half of a connection's sink.
#[derive(Debug)]
pub struct ConnectionWriter<O> {
    tx: Option<mpsc::Sender<O>>,
    shared: Arc<Shared>,
}

impl<O> ConnectionWriter<O> {
    pub async fn send(&self, item: O) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(item).await.map_err(|_| Error::ConnectionClosed)
    }

    /// End the sink direction. Queued writes still flush downstream.
    pub fn finish(&mut self) {
        self.tx.take();
    }

    /// Await settlement of the sink direction.
    pub async fn closed(&self) -> CloseStatus {
        self.shared.sink_status.wait().await
    }

    /// Clonable send-only handle. Fails after [`finish`](Self::finish).
    pub fn handle(&self) -> Result<ConnectionSink<O>> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        Ok(ConnectionSink { tx: tx.clone() })
    }
}

/// Clonable send-only handle onto a connection sink.
///
/// Clones share the same bounded queue, so writes from any handle are
/// serialized through the single sink pipe.
#[derive(Debug, Clone)]
pub struct ConnectionSink<O> {
    tx: mpsc::Sender<O>,
}

impl<O> ConnectionSink<O> {
    pub async fn send(&self, item: O) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Clonable control handle: abort and status observation without access
/// to the data path.
#[derive(Debug, Clone)]
pub struct ConnectionControl {
    shared: Arc<Shared>,
}

impl ConnectionControl {
    /// Cancel both pipes. Unsettled directions resolve with an
    /// "operation aborted" error; settled ones keep their outcome.
    pub fn abort(&self) {
        self.shared.cancel.cancel();
    }

    /// Settle both directions with the given status, then cancel the
    /// pipes. Used when a peer communicated the terminal status itself.
    pub fn close_with(&self, status: CloseStatus) {
        self.shared.source_status.settle(status.clone());
        self.shared.sink_status.settle(status);
        self.shared.cancel.cancel();
    }

    pub async fn status(&self) -> CloseStatus {
        self.shared.status.wait().await
    }

    pub fn try_status(&self) -> Option<CloseStatus> {
        self.shared.status.get()
    }

    pub fn try_source_status(&self) -> Option<CloseStatus> {
        self.shared.source_status.get()
    }

    pub async fn source_closed(&self) -> CloseStatus {
        self.shared.source_status.wait().await
    }

    pub async fn sink_closed(&self) -> CloseStatus {
        self.shared.sink_status.wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.status.is_settled()
    }

    pub fn is_source_closed(&self) -> bool {
        self.shared.source_status.is_settled()
    }

    pub fn is_sink_closed(&self) -> bool {
        self.shared.sink_status.is_settled()
    }
}

// =============================================================================
// Relay Pipes
// =============================================================================

async fn relay_source<I, S>(source: S, tx: mpsc::Sender<I>, shared: Arc<Shared>)
where
    I: Send,
    S: Stream<Item = Result<I>> + Send,
{
    tokio::pin!(source);
    let status = loop {
        tokio::select! {
            _ = shared.source_cancel.cancelled() => {
                break CloseStatus::error(Error::Aborted.to_string());
            }
            next = source.next() => match next {
                Some(Ok(item)) => {
                    // Backpressure: suspend until the consumer drains,
                    // but stay cancellable while suspended.
                    tokio::select! {
                        _ = shared.source_cancel.cancelled() => {
                            break CloseStatus::error(Error::Aborted.to_string());
                        }
                        sent = tx.send(item) => {
                            if sent.is_err() {
                                // Consumer dropped the exposed source.
                                break CloseStatus::Success;
                            }
                        }
                    }
                }
                Some(Err(err)) => break CloseStatus::Error(err.to_string()),
                None => break CloseStatus::Success,
            }
        }
    };
    shared.source_status.settle(status);
}

async fn relay_sink<O, K>(mut rx: mpsc::Receiver<O>, mut sink: K, shared: Arc<Shared>)
where
    O: Send,
    K: ItemSink<O>,
{
    let status = loop {
        tokio::select! {
            _ = shared.sink_cancel.cancelled() => {
                break CloseStatus::error(Error::Aborted.to_string());
            }
            item = rx.recv() => match item {
                Some(item) => {
                    tokio::select! {
                        _ = shared.sink_cancel.cancelled() => {
                            break CloseStatus::error(Error::Aborted.to_string());
                        }
                        sent = sink.send(item) => {
                            if let Err(err) = sent {
                                break CloseStatus::Error(err.to_string());
                            }
                        }
                    }
                }
                None => {
                    // All writers finished; flush and close downstream.
                    break match sink.close().await {
                        Ok(()) => CloseStatus::Success,
                        Err(err) => CloseStatus::Error(err.to_string()),
                    };
                }
            }
        }
    };
    shared.sink_status.settle(status);
}

/// Settle the aggregate status once both directions have settled,
/// surfacing the first error found.
async fn settle_aggregate(shared: Arc<Shared>) {
    let source = shared.source_status.wait().await;
    let sink = shared.sink_status.wait().await;
    let aggregate = if source.is_error() {
        source
    } else if sink.is_error() {
        sink
    } else {
        CloseStatus::Success
    };
    shared.status.settle(aggregate);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::wrappers::ReceiverStream;

    /// Sink whose writes always fail, standing in for a broken
    /// downstream transport.
    struct FailingSink;

    #[async_trait]
    impl ItemSink<Bytes> for FailingSink {
        async fn send(&mut self, _item: Bytes) -> Result<()> {
            Err(Error::transport("disk full"))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Connection wired to local channels on both ends, returning the
    /// upstream feeder and the downstream drain for the test to drive.
    fn channel_connection() -> (
        Connection<Bytes, Bytes>,
        mpsc::Sender<Result<Bytes>>,
        mpsc::Receiver<Bytes>,
    ) {
        let (feed_tx, feed_rx) = mpsc::channel::<Result<Bytes>>(8);
        let (drain_tx, drain_rx) = mpsc::channel::<Bytes>(8);

        let conn = Connection::new(
            ReceiverStream::new(feed_rx),
            ChannelSink::new(drain_tx),
            ConnectionOptions::default(),
        );
        (conn, feed_tx, drain_rx)
    }

    #[tokio::test]
    async fn relays_source_and_sink() {
        let (mut conn, feed, mut drain) = channel_connection();

        feed.send(Ok(Bytes::from_static(b"in"))).await.unwrap();
        assert_eq!(conn.recv().await, Some(Bytes::from_static(b"in")));

        conn.send(Bytes::from_static(b"out")).await.unwrap();
        assert_eq!(drain.recv().await, Some(Bytes::from_static(b"out")));
    }

    #[tokio::test]
    async fn finish_half_closes_sink_only() {
        let (mut conn, feed, mut drain) = channel_connection();

        conn.send(Bytes::from_static(b"last")).await.unwrap();
        conn.finish();

        // Queued write still flushes, then the downstream closes.
        assert_eq!(drain.recv().await, Some(Bytes::from_static(b"last")));
        assert_eq!(drain.recv().await, None);
        assert_eq!(conn.sink_closed().await, CloseStatus::Success);

        // The source direction stays open and readable.
        assert!(!conn.is_closed());
        feed.send(Ok(Bytes::from_static(b"still here"))).await.unwrap();
        assert_eq!(conn.recv().await, Some(Bytes::from_static(b"still here")));

        // Ending the other direction settles the aggregate.
        drop(feed);
        assert_eq!(conn.status().await, CloseStatus::Success);
    }

    #[tokio::test]
    async fn send_after_finish_fails_synchronously() {
        let (mut conn, _feed, _drain) = channel_connection();
        conn.finish();

        assert!(matches!(
            conn.send(Bytes::from_static(b"late")).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn abort_resolves_unsettled_directions_with_aborted() {
        let (conn, _feed, _drain) = channel_connection();

        conn.abort();
        let status = conn.status().await;
        assert_eq!(status, CloseStatus::error("operation aborted"));
        assert_eq!(
            conn.source_closed().await,
            CloseStatus::error("operation aborted")
        );
        assert_eq!(
            conn.sink_closed().await,
            CloseStatus::error("operation aborted")
        );
    }

    #[tokio::test]
    async fn abort_keeps_already_settled_direction() {
        let (mut conn, _feed, mut drain) = channel_connection();

        conn.finish();
        assert_eq!(drain.recv().await, None);
        assert_eq!(conn.sink_closed().await, CloseStatus::Success);

        conn.abort();
        // The settled sink keeps its success; the source takes the abort.
        assert_eq!(conn.sink_closed().await, CloseStatus::Success);
        assert_eq!(
            conn.source_closed().await,
            CloseStatus::error("operation aborted")
        );
        assert_eq!(conn.status().await, CloseStatus::error("operation aborted"));
    }

    #[tokio::test]
    async fn sink_failure_settles_error() {
        let (feed_tx, feed_rx) = mpsc::channel::<Result<Bytes>>(8);
        let conn: Connection<Bytes, Bytes> = Connection::new(
            ReceiverStream::new(feed_rx),
            FailingSink,
            ConnectionOptions::default(),
        );

        // The write is accepted into the queue; the relay hits the
        // failure and settles the sink direction with it.
        conn.send(Bytes::from_static(b"doomed")).await.unwrap();
        assert_eq!(
            conn.sink_closed().await,
            CloseStatus::error("transport error: disk full")
        );
        assert!(conn.is_sink_closed());
        assert!(!conn.is_source_closed());

        // Once the source ends too, the aggregate surfaces the sink error.
        drop(feed_tx);
        assert_eq!(
            conn.status().await,
            CloseStatus::error("transport error: disk full")
        );
    }

    #[tokio::test]
    async fn source_error_propagates_to_aggregate() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(Error::transport("wire cut")),
        ]);
        let (drain_tx, _drain_rx) = mpsc::channel::<Bytes>(8);

        let mut conn = Connection::new(
            source,
            ChannelSink::new(drain_tx),
            ConnectionOptions::default(),
        );

        assert_eq!(conn.recv().await, Some(Bytes::from_static(b"ok")));
        assert_eq!(
            conn.source_closed().await,
            CloseStatus::error("transport error: wire cut")
        );

        conn.finish();
        assert_eq!(
            conn.status().await,
            CloseStatus::error("transport error: wire cut")
        );
    }

    #[tokio::test]
    async fn aggregate_waits_for_both_directions() {
        let (mut conn, feed, _drain) = channel_connection();

        conn.finish();
        assert_eq!(conn.sink_closed().await, CloseStatus::Success);

        // Source still open: the aggregate must not settle yet.
        assert!(
            timeout(Duration::from_millis(50), conn.status())
                .await
                .is_err()
        );
        assert!(!conn.is_closed());

        drop(feed);
        assert_eq!(conn.status().await, CloseStatus::Success);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn close_settles_both_directions_success() {
        let (mut conn, _feed, mut drain) = channel_connection();

        conn.send(Bytes::from_static(b"bye")).await.unwrap();
        conn.close();

        assert_eq!(drain.recv().await, Some(Bytes::from_static(b"bye")));
        assert_eq!(drain.recv().await, None);
        assert_eq!(conn.status().await, CloseStatus::Success);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let (a, _fa, _da) = channel_connection();
        let (b, _fb, _db) = channel_connection();

        assert!(!a.id().is_empty());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn explicit_id_and_metadata_are_kept() {
        let (feed_tx, feed_rx) = mpsc::channel::<Result<Bytes>>(1);
        let (drain_tx, _drain_rx) = mpsc::channel::<Bytes>(1);
        let _keep = feed_tx;

        let mut metadata = Metadata::new();
        metadata.insert("purpose".into(), "test".into());

        let conn: Connection<Bytes, Bytes> = Connection::new(
            ReceiverStream::new(feed_rx),
            ChannelSink::new(drain_tx),
            ConnectionOptions::with_id("conn-1").metadata(metadata),
        );

        assert_eq!(conn.id(), "conn-1");
        assert_eq!(conn.metadata().get("purpose").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn close_with_reports_peer_status() {
        let (conn, _feed, _drain) = channel_connection();
        let control = conn.control();

        control.close_with(CloseStatus::error("peer failure"));
        assert_eq!(conn.status().await, CloseStatus::error("peer failure"));
    }
}
