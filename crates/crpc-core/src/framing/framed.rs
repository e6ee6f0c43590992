//! Typed view over a byte connection.
//!
//! Stacks the frame codec onto a `Connection<Bytes, Bytes>`: inbound
//! chunks run through a [`FrameDecoder`], outbound values through a
//! [`FrameEncoder`], and a graceful close of the typed side emits the
//! terminator sentinel so the peer's decoder can confirm the stream
//! ended cleanly.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::connection::{Connection, ConnectionOptions, ConnectionReader, ConnectionWriter, ItemSink};
use crate::error::Result;
use crate::framing::decoder::FrameDecoder;
use crate::framing::encoder::FrameEncoder;
use crate::framing::format::FrameFormat;

/// Wrap a byte connection into a connection of framed values.
///
/// The returned connection carries the id and metadata of the one it
/// wraps. A decode failure settles the inbound direction with that
/// error; the byte stream ending without the terminator counts as one.
pub fn framed<T, F>(connection: Connection<Bytes, Bytes>, format: F) -> Connection<T, T>
where
    T: Send + 'static,
    F: FrameFormat<T> + Clone + 'static,
{
    let options =
        ConnectionOptions::with_id(connection.id()).metadata(connection.metadata().clone());
    let (reader, writer, _) = connection.into_split();

    let source = decode_stream(reader, FrameDecoder::new(format.clone()));
    let sink = EncoderSink {
        writer,
        encoder: FrameEncoder::new(format),
    };

    Connection::new(source, sink, options)
}

struct DecodeState<T, F> {
    reader: Option<ConnectionReader<Bytes>>,
    decoder: FrameDecoder<T, F>,
    pending: VecDeque<Result<T>>,
}

fn decode_stream<T, F>(
    reader: ConnectionReader<Bytes>,
    decoder: FrameDecoder<T, F>,
) -> impl stream::Stream<Item = Result<T>>
where
    T: Send + 'static,
    F: FrameFormat<T> + 'static,
{
    let state = DecodeState {
        reader: Some(reader),
        decoder,
        pending: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(next) = state.pending.pop_front() {
                return Some((next, state));
            }
            let reader = state.reader.as_mut()?;

            match reader.recv().await {
                Some(chunk) => match state.decoder.push(chunk) {
                    Ok(values) => state.pending.extend(values.into_iter().map(Ok)),
                    Err(err) => {
                        state.reader = None;
                        return Some((Err(err), state));
                    }
                },
                None => {
                    state.reader = None;
                    match state.decoder.finish() {
                        Ok(values) => state.pending.extend(values.into_iter().map(Ok)),
                        Err(err) => return Some((Err(err), state)),
                    }
                }
            }
        }
    })
}

struct EncoderSink<T, F> {
    writer: ConnectionWriter<Bytes>,
    encoder: FrameEncoder<T, F>,
}

#[async_trait]
impl<T, F> ItemSink<T> for EncoderSink<T, F>
where
    T: Send,
    F: FrameFormat<T>,
{
    async fn send(&mut self, item: T) -> Result<()> {
        let frame = self.encoder.encode(&item)?;
        self.writer.send(frame).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(terminator) = self.encoder.end() {
            self.writer.send(terminator).await?;
        }
        self.writer.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelSink;
    use crate::framing::format::BincodeFormat;
    use crate::status::CloseStatus;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_stream::wrappers::ReceiverStream;

    fn byte_pair() -> (Connection<Bytes, Bytes>, Connection<Bytes, Bytes>) {
        let (l2r_tx, l2r_rx) = mpsc::channel::<Bytes>(32);
        let (r2l_tx, r2l_rx) = mpsc::channel::<Bytes>(32);

        let left = Connection::new(
            ReceiverStream::new(r2l_rx).map(Ok),
            ChannelSink::new(l2r_tx),
            ConnectionOptions::with_id("bytes"),
        );
        let right = Connection::new(
            ReceiverStream::new(l2r_rx).map(Ok),
            ChannelSink::new(r2l_tx),
            ConnectionOptions::with_id("bytes"),
        );
        (left, right)
    }

    #[tokio::test]
    async fn values_roundtrip_over_framed_bytes() {
        let (left, right) = byte_pair();
        let mut typed_left = framed::<String, _>(left, BincodeFormat);
        let mut typed_right = framed::<String, _>(right, BincodeFormat);

        typed_left.send("hello".to_string()).await.unwrap();
        typed_left.send("world".to_string()).await.unwrap();
        assert_eq!(typed_right.recv().await.as_deref(), Some("hello"));
        assert_eq!(typed_right.recv().await.as_deref(), Some("world"));

        typed_right.send("back".to_string()).await.unwrap();
        assert_eq!(typed_left.recv().await.as_deref(), Some("back"));
    }

    #[tokio::test]
    async fn graceful_close_terminates_the_peer_stream() {
        let (left, right) = byte_pair();
        let mut typed_left = framed::<String, _>(left, BincodeFormat);
        let mut typed_right = framed::<String, _>(right, BincodeFormat);

        typed_left.send("last".to_string()).await.unwrap();
        typed_left.close();

        assert_eq!(typed_right.recv().await.as_deref(), Some("last"));
        assert_eq!(typed_right.recv().await, None);
        assert_eq!(
            timeout(Duration::from_secs(2), typed_right.source_closed())
                .await
                .unwrap(),
            CloseStatus::Success
        );
    }

    #[tokio::test]
    async fn missing_terminator_settles_source_with_error() {
        let (feed_tx, feed_rx) = mpsc::channel::<Bytes>(8);
        let (drain_tx, _drain_rx) = mpsc::channel::<Bytes>(8);
        let bytes = Connection::new(
            ReceiverStream::new(feed_rx).map(Ok),
            ChannelSink::new(drain_tx),
            ConnectionOptions::with_id("bytes"),
        );
        let mut typed = framed::<String, _>(bytes, BincodeFormat);

        let encoder = FrameEncoder::<String, _>::new(BincodeFormat);
        feed_tx
            .send(encoder.encode(&"partial".to_string()).unwrap())
            .await
            .unwrap();
        // Ending the byte stream without the terminator sentinel.
        drop(feed_tx);

        assert_eq!(typed.recv().await.as_deref(), Some("partial"));
        assert_eq!(typed.recv().await, None);
        assert!(typed.source_closed().await.is_error());
    }

    #[tokio::test]
    async fn id_and_metadata_carry_over() {
        let (feed_tx, feed_rx) = mpsc::channel::<Bytes>(1);
        let (drain_tx, _drain_rx) = mpsc::channel::<Bytes>(1);
        let metadata =
            crate::connection::Metadata::from([("role".to_string(), "test".to_string())]);
        let bytes = Connection::new(
            ReceiverStream::new(feed_rx).map(Ok),
            ChannelSink::new(drain_tx),
            ConnectionOptions::with_id("wrapped").metadata(metadata),
        );
        drop(feed_tx);

        let typed = framed::<String, _>(bytes, BincodeFormat);
        assert_eq!(typed.id(), "wrapped");
        assert_eq!(
            typed.metadata().get("role").map(String::as_str),
            Some("test")
        );
    }
}
