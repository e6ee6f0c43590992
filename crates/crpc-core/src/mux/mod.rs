//! Multiplexing of logical connections over one transport connection.
//!
//! The multiplexer owns a transport `Connection<Packet, Packet>` and a
//! table of logical connections keyed by correlation id. A single
//! dispatch task consumes the transport source plus an internal command
//! queue; since only that task touches the table, no locks are needed.
//! All outbound packets funnel through the transport connection's single
//! sink queue, so writes from concurrent logical connections never
//! interleave at the packet level.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::{
    Connection, ConnectionControl, ConnectionOptions, ConnectionSink, ItemSink, Metadata,
};
use crate::constants::{
    COMMAND_QUEUE_CAPACITY, INBOUND_QUEUE_CAPACITY, SINK_QUEUE_CAPACITY, SOURCE_QUEUE_CAPACITY,
};
use crate::error::{Error, Result};
use crate::status::CloseStatus;

mod packet;

pub use packet::Packet;

/// A multiplexed byte channel handed to consumers.
pub type LogicalConnection = Connection<Bytes, Bytes>;

/// Tuning knobs for a multiplexer instance.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Pending inbound logical connections before dispatch suspends.
    pub inbound_capacity: usize,
    /// Pending commands (opens, settle notifications).
    pub command_capacity: usize,
    /// Per-logical-connection source queue capacity.
    pub source_capacity: usize,
    /// Per-logical-connection sink queue capacity.
    pub sink_capacity: usize,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            inbound_capacity: INBOUND_QUEUE_CAPACITY,
            command_capacity: COMMAND_QUEUE_CAPACITY,
            source_capacity: SOURCE_QUEUE_CAPACITY,
            sink_capacity: SINK_QUEUE_CAPACITY,
        }
    }
}

/// Demultiplexer for many logical connections over one transport.
#[derive(Debug)]
pub struct Multiplexer {
    inbound: mpsc::Receiver<LogicalConnection>,
    handle: MuxHandle,
}

impl Multiplexer {
    /// Start a multiplexer over the given transport connection.
    pub fn new(transport: Connection<Packet, Packet>) -> Self {
        Self::with_options(transport, MuxOptions::default())
    }

    pub fn with_options(transport: Connection<Packet, Packet>, options: MuxOptions) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(options.command_capacity.max(1));

        tokio::spawn(dispatch(
            transport,
            cmd_rx,
            cmd_tx.clone(),
            inbound_tx,
            options,
        ));

        Self {
            inbound: inbound_rx,
            handle: MuxHandle { cmd_tx },
        }
    }

    /// Await the next logical connection opened by the peer.
    ///
    /// Returns `None` once the transport has gone away.
    pub async fn accept(&mut self) -> Option<LogicalConnection> {
        self.inbound.recv().await
    }

    /// Open a logical connection towards the peer.
    pub async fn open(&self, metadata: Metadata) -> Result<LogicalConnection> {
        self.handle.open(metadata).await
    }

    /// Number of live entries in the active-connection table.
    pub async fn active_count(&self) -> Result<usize> {
        self.handle.active_count().await
    }

    /// Clonable handle for opening connections from other tasks.
    pub fn handle(&self) -> MuxHandle {
        self.handle.clone()
    }
}

/// Clonable handle onto a running multiplexer.
#[derive(Debug, Clone)]
pub struct MuxHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl MuxHandle {
    /// Open a logical connection towards the peer.
    ///
    /// Resolves once the `Create` packet has been accepted by the
    /// transport sink.
    pub async fn open(&self, metadata: Metadata) -> Result<LogicalConnection> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Open {
                metadata,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Number of live entries in the active-connection table.
    pub async fn active_count(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ActiveCount { reply: reply_tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

enum Command {
    Open {
        metadata: Metadata,
        reply: oneshot::Sender<Result<LogicalConnection>>,
    },
    Settled {
        id: String,
        status: CloseStatus,
    },
    ActiveCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Table entry for one live logical connection.
struct ActiveEntry {
    /// Writer feeding the connection's source queue; dropped on inbound
    /// half-close.
    inbound: Option<mpsc::Sender<Bytes>>,
    control: ConnectionControl,
}

/// Sink adapter turning logical-connection writes into `Data` packets
/// addressed to the transport.
struct DataPacketSink {
    id: String,
    outbound: ConnectionSink<Packet>,
}

#[async_trait]
impl ItemSink<Bytes> for DataPacketSink {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.outbound
            .send(Packet::Data {
                id: self.id.clone(),
                payload: Some(payload),
            })
            .await
    }

    async fn close(&mut self) -> Result<()> {
        // End-of-stream for this direction only.
        self.outbound
            .send(Packet::Data {
                id: self.id.clone(),
                payload: None,
            })
            .await
    }
}

// =============================================================================
// Dispatch
// =============================================================================

async fn dispatch(
    transport: Connection<Packet, Packet>,
    mut cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: mpsc::Sender<Command>,
    inbound_tx: mpsc::Sender<LogicalConnection>,
    options: MuxOptions,
) {
    let (mut reader, writer, transport_ctl) = transport.into_split();
    let Ok(outbound) = writer.handle() else {
        return;
    };
    let mut table: HashMap<String, ActiveEntry> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                Command::Open { metadata, reply } => {
                    let id = Uuid::new_v4().to_string();
                    debug!(id = %id, "opening logical connection");
                    let conn = register_logical(
                        &mut table,
                        &outbound,
                        &cmd_tx,
                        id.clone(),
                        metadata.clone(),
                        &options,
                    );
                    match outbound.send(Packet::Create { id: id.clone(), metadata }).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(conn));
                        }
                        Err(err) => {
                            if let Some(entry) = table.remove(&id) {
                                entry.control.abort();
                            }
                            drop(conn);
                            let _ = reply.send(Err(err));
                        }
                    }
                }
                Command::Settled { id, status } => {
                    // Only notify the peer if the entry is still ours to
                    // clean up; a remote Close already removed it.
                    if table.remove(&id).is_some() {
                        debug!(id = %id, status = %status, "connection settled");
                        let _ = outbound.send(Packet::Close { id, status }).await;
                    }
                }
                Command::ActiveCount { reply } => {
                    let _ = reply.send(table.len());
                }
            },
            packet = reader.recv() => match packet {
                Some(Packet::Create { id, metadata }) => {
                    if table.contains_key(&id) {
                        // Id reuse while active is undefined by contract.
                        warn!(id = %id, "duplicate create for live id ignored");
                        continue;
                    }
                    debug!(id = %id, "peer opened logical connection");
                    let conn = register_logical(
                        &mut table,
                        &outbound,
                        &cmd_tx,
                        id.clone(),
                        metadata,
                        &options,
                    );
                    if inbound_tx.send(conn).await.is_err() {
                        // Nobody is accepting inbound connections.
                        if let Some(entry) = table.remove(&id) {
                            entry.control.abort();
                        }
                    }
                }
                Some(Packet::Data { id, payload }) => match table.get_mut(&id) {
                    Some(entry) => match payload {
                        Some(bytes) => {
                            if let Some(tx) = entry.inbound.as_ref() {
                                if tx.send(bytes).await.is_err() {
                                    entry.inbound = None;
                                }
                            }
                        }
                        // Half-close: only the inbound direction ends.
                        None => entry.inbound = None,
                    },
                    None => trace!(id = %id, "data for unknown connection ignored"),
                },
                Some(Packet::Close { id, status }) => {
                    if let Some(entry) = table.remove(&id) {
                        debug!(id = %id, status = %status, "peer closed connection");
                        entry.control.close_with(status);
                        entry.control.status().await;
                    } else {
                        trace!(id = %id, "close for unknown connection ignored");
                    }
                }
                None => break,
            }
        }
    }

    // Transport gone: abort whatever is still active and close the
    // inbound sequence.
    drop(inbound_tx);
    let reason = match transport_ctl.try_source_status() {
        Some(CloseStatus::Error(err)) => format!("transport failure: {}", err),
        _ => "transport failure: transport closed".to_string(),
    };
    debug!(active = table.len(), reason = %reason, "transport ended, tearing down");
    for (id, entry) in table.drain() {
        trace!(id = %id, "aborting connection on transport teardown");
        entry.control.close_with(CloseStatus::Error(reason.clone()));
    }
}

fn register_logical(
    table: &mut HashMap<String, ActiveEntry>,
    outbound: &ConnectionSink<Packet>,
    cmd_tx: &mpsc::Sender<Command>,
    id: String,
    metadata: Metadata,
    options: &MuxOptions,
) -> LogicalConnection {
    let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(options.source_capacity.max(1));
    let source = ReceiverStream::new(inbound_rx).map(Ok);
    let sink = DataPacketSink {
        id: id.clone(),
        outbound: outbound.clone(),
    };

    let conn = Connection::new(
        source,
        sink,
        ConnectionOptions {
            id: Some(id.clone()),
            metadata,
            source_capacity: options.source_capacity,
            sink_capacity: options.sink_capacity,
        },
    );

    // Forward the settled status back into dispatch, which emits the
    // Close packet and drops the table entry.
    let control = conn.control();
    let notify = cmd_tx.clone();
    let settled_id = id.clone();
    tokio::spawn({
        let control = control.clone();
        async move {
            let status = control.status().await;
            let _ = notify.send(Command::Settled {
                id: settled_id,
                status,
            })
            .await;
        }
    });

    table.insert(
        id,
        ActiveEntry {
            inbound: Some(inbound_tx),
            control,
        },
    );
    conn
}

// =============================================================================
// Tests
// =============================================================================
