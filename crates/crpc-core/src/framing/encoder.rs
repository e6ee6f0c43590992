//! Stateless length-prefixed frame encoder.
//!
//! Each value becomes one frame: a 4-byte little-endian payload length
//! followed by the serialized payload. A stream of frames may be closed
//! with the terminator sentinel so the decoder can tell a graceful end
//! from a transport severed mid-frame.

use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_SIZE, TERMINATOR};
use crate::error::{Error, Result};
use crate::framing::format::FrameFormat;

/// Encoder for length-prefixed frames.
#[derive(Debug)]
pub struct FrameEncoder<T, F> {
    format: F,
    send_terminator_on_end: bool,
    _value: PhantomData<fn(&T)>,
}

impl<T, F: FrameFormat<T>> FrameEncoder<T, F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            send_terminator_on_end: true,
            _value: PhantomData,
        }
    }

    /// Control whether [`end`](Self::end) emits the terminator sentinel.
    /// Defaults to true.
    pub fn send_terminator_on_end(mut self, enabled: bool) -> Self {
        self.send_terminator_on_end = enabled;
        self
    }

    /// Encode one value as a complete frame (header plus payload).
    pub fn encode(&self, value: &T) -> Result<Bytes> {
        let payload = self.format.encode(value)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(Error::codec(format!(
                "frame payload too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Bytes to emit when the value stream completes.
    ///
    /// Returns the terminator sentinel unless it was disabled.
    pub fn end(&self) -> Option<Bytes> {
        self.send_terminator_on_end
            .then(|| Bytes::from_static(&TERMINATOR))
    }
}
