//! Byte connections over `AsyncRead`/`AsyncWrite` pairs.
//!
//! Bridges any tokio byte stream (a TCP socket, a pipe, a duplex in
//! tests) into a `Connection<Bytes, Bytes>`. Reads arrive in chunks of
//! whatever size the stream produces, capped by the chunk buffer;
//! graceful close shuts the write half down so the peer observes EOF.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crpc_core::connection::{Connection, ConnectionOptions, ItemSink};
use crpc_core::constants::IO_CHUNK_SIZE;
use crpc_core::{Error, Result};

/// Wrap a read/write pair into a byte connection.
pub fn from_io<R, W>(reader: R, writer: W, options: ConnectionOptions) -> Connection<Bytes, Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let source = stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(IO_CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            // EOF: the peer shut its write half down.
            Ok(0) => {
                trace!("byte stream reached eof");
                None
            }
            Ok(n) => {
                trace!(bytes = n, "read chunk");
                Some((Ok(buf.freeze()), Some(reader)))
            }
            Err(err) => Some((Err(Error::Io(err)), None)),
        }
    });

    Connection::new(source, IoSink { writer }, options)
}

struct IoSink<W> {
    writer: W,
}

#[async_trait]
impl<W> ItemSink<Bytes> for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.writer.write_all(&chunk).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
