//! Buffered byte window over a sequence of arrived chunks.
//!
//! Incoming chunks are queued without copying; `peek` and `read` assemble
//! bytes across chunk boundaries so framing never depends on how the
//! transport happened to split the stream.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// Ordered queue of byte chunks with a cached total size.
///
/// `read(n)` is destructive, `peek(n)` is not; both return `None` when
/// fewer than `n` bytes are buffered and never return fewer than `n`
/// bytes otherwise.
#[derive(Debug, Default)]
pub struct ByteWindow {
    chunks: VecDeque<Bytes>,
    size: usize,
}

impl ByteWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arrived chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.size += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Copy out the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<Bytes> {
        if self.size < n {
            return None;
        }

        let first = self.chunks.front()?;
        if first.len() >= n {
            return Some(first.slice(..n));
        }

        let mut out = BytesMut::with_capacity(n);
        for chunk in &self.chunks {
            let take = chunk.len().min(n - out.len());
            out.extend_from_slice(&chunk[..take]);
            if out.len() == n {
                break;
            }
        }
        Some(out.freeze())
    }

    /// Consume and return exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> Option<Bytes> {
        if self.size < n {
            return None;
        }
        self.size -= n;

        // Fast path: the front chunk alone covers the request.
        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                return Some(out);
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            // The size check above guarantees enough chunks remain.
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let take = chunk.len().min(n - out.len());
            out.extend_from_slice(&chunk.split_to(take));
            if !chunk.is_empty() {
                self.chunks.push_front(chunk);
            }
        }
        Some(out.freeze())
    }
}
