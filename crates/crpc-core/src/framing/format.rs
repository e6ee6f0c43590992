//! Pluggable frame payload serialization.
//!
//! The codec does not care what a frame payload contains; it only needs a
//! deterministic encode/decode pair that is self-delimiting within one
//! frame. The default implementation is bincode over serde types, which is
//! what the multiplexer uses for its packets.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serializer contract for one frame payload.
pub trait FrameFormat<T>: Send + Sync {
    /// Serialize a value into the payload bytes of one frame.
    fn encode(&self, value: &T) -> Result<Bytes>;

    /// Deserialize a value from the payload bytes of one frame.
    fn decode(&self, payload: &[u8]) -> Result<T>;
}

/// Bincode-backed frame format for serde types.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeFormat;

impl<T> FrameFormat<T> for BincodeFormat
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| Error::codec(format!("serialization failed: {}", e)))
    }

    fn decode(&self, payload: &[u8]) -> Result<T> {
        bincode::deserialize(payload)
            .map_err(|e| Error::codec(format!("deserialization failed: {}", e)))
    }
}

/// Identity format: the frame payload is the value itself.
///
/// Useful when framing already-opaque byte payloads, and for tests that
/// pin down exact wire bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytesFormat;

impl FrameFormat<Bytes> for RawBytesFormat {
    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(payload))
    }
}
