//! Stateful length-prefixed frame decoder.
//!
//! Accepts input chunks of any size and yields decoded values as complete
//! frames become available. The decoder resynchronizes across arbitrary
//! chunk boundaries: nothing is consumed from the byte window until an
//! entire frame (header plus payload) has arrived.

use std::marker::PhantomData;

use bytes::Bytes;
use tracing::trace;

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_SIZE, TERMINATOR};
use crate::error::{Error, Result};
use crate::framing::format::FrameFormat;
use crate::framing::window::ByteWindow;

/// Decoder for a single stream of length-prefixed frames.
///
/// Not restartable: once the terminator has been observed or
/// [`finish`](Self::finish) has run, the decoder is done.
#[derive(Debug)]
pub struct FrameDecoder<T, F> {
    format: F,
    window: ByteWindow,
    pending_frame_size: Option<usize>,
    require_terminator: bool,
    max_frame_size: usize,
    terminated: bool,
    _value: PhantomData<fn() -> T>,
}

impl<T, F: FrameFormat<T>> FrameDecoder<T, F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            window: ByteWindow::new(),
            pending_frame_size: None,
            require_terminator: true,
            max_frame_size: MAX_FRAME_SIZE,
            terminated: false,
            _value: PhantomData,
        }
    }

    /// Control whether a missing terminator at end-of-input is fatal.
    /// Defaults to true.
    pub fn require_terminator(mut self, required: bool) -> Self {
        self.require_terminator = required;
        self
    }

    /// Override the maximum accepted frame payload size.
    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// Feed one input chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: Bytes) -> Result<Vec<T>> {
        self.window.push(chunk);
        let mut out = Vec::new();
        self.drain(&mut out)?;
        Ok(out)
    }

    /// Signal end-of-input: drain complete buffered frames, then verify
    /// the stream ended on the terminator sentinel (unless opted out).
    pub fn finish(&mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        self.drain(&mut out)?;

        if !self.terminated && self.require_terminator {
            return Err(Error::protocol("stream ended without terminator"));
        }
        Ok(out)
    }

    /// Whether the terminator sentinel has been observed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bytes currently buffered and not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    fn drain(&mut self, out: &mut Vec<T>) -> Result<()> {
        loop {
            if self.terminated {
                return Ok(());
            }

            let payload_len = match self.pending_frame_size {
                Some(len) => len,
                None => {
                    let Some(header) = self.window.peek(FRAME_HEADER_LEN) else {
                        return Ok(());
                    };
                    if header[..] == TERMINATOR {
                        self.window.read(FRAME_HEADER_LEN);
                        self.terminated = true;
                        trace!(buffered = self.window.len(), "frame stream terminated");
                        return Ok(());
                    }

                    let len =
                        u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
                    if len > self.max_frame_size {
                        return Err(Error::protocol(format!(
                            "frame length {} exceeds maximum {}",
                            len, self.max_frame_size
                        )));
                    }
                    self.pending_frame_size = Some(len);
                    len
                }
            };

            // Wait for the whole frame before consuming anything.
            let Some(frame) = self.window.read(FRAME_HEADER_LEN + payload_len) else {
                return Ok(());
            };
            self.pending_frame_size = None;

            let value = self.format.decode(&frame[FRAME_HEADER_LEN..])?;
            out.push(value);
        }
    }
}
