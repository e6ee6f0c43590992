//! Length-prefixed framing over unreliable chunk boundaries.
//!
//! Frames are a 4-byte little-endian payload length followed by the
//! payload itself; a stream ends with the terminator sentinel. The
//! decoder buffers partial input in a [`ByteWindow`], so callers can
//! feed whatever chunk sizes the transport produces.

mod decoder;
mod encoder;
mod format;
mod framed;
mod window;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;
pub use format::{BincodeFormat, FrameFormat, RawBytesFormat};
pub use framed::framed;
pub use window::ByteWindow;
