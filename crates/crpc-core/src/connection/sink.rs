//! Sink seam for connection egress.
//!
//! A connection relays its exposed sink into whatever the creator supplied
//! here: a local channel, a packet adapter, or a raw byte writer.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Consumer side of a connection's egress direction.
///
/// `send` may suspend for backpressure. `close` flushes and ends the
/// stream; further sends are a contract violation.
#[async_trait]
pub trait ItemSink<T>: Send {
    async fn send(&mut self, item: T) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Sink backed by a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelSink<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl<T: Send> ItemSink<T> for ChannelSink<T> {
    async fn send(&mut self, item: T) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(item).await.map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the sender signals end-of-stream to the receiver.
        self.tx.take();
        Ok(())
    }
}
