//! In-process connected pairs.
//!
//! Two connections joined by crossed bounded channels. What one side
//! sends, the other receives; a graceful close on one side ends the
//! peer's source. No serialization is involved, so the item type is
//! whatever the caller needs, including `Packet` for multiplexer tests
//! and `Bytes` for framing stacks.

use crpc_core::connection::{ChannelSink, Connection, ConnectionOptions};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const DEFAULT_PAIR_CAPACITY: usize = 32;

/// A connected pair with the default channel capacity.
pub fn local_pair<T: Send + 'static>() -> (Connection<T, T>, Connection<T, T>) {
    local_pair_with_capacity(DEFAULT_PAIR_CAPACITY)
}

/// A connected pair whose crossed channels hold up to `capacity` items.
pub fn local_pair_with_capacity<T: Send + 'static>(
    capacity: usize,
) -> (Connection<T, T>, Connection<T, T>) {
    let id = Uuid::new_v4().to_string();
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(capacity.max(1));
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(capacity.max(1));

    let a = Connection::new(
        ReceiverStream::new(b_to_a_rx).map(Ok),
        ChannelSink::new(a_to_b_tx),
        ConnectionOptions::with_id(id.clone()),
    );
    let b = Connection::new(
        ReceiverStream::new(a_to_b_rx).map(Ok),
        ChannelSink::new(b_to_a_tx),
        ConnectionOptions::with_id(id),
    );
    (a, b)
}
