//! Error types for crpc-core.

use thiserror::Error;

/// Main error type for crpc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation: malformed frame length, missing terminator,
    /// unknown packet shape. Fatal to the decode stream or dispatch task.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error while serializing or deserializing a frame payload.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// The underlying transport reported a failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The connection (or one of its halves) is already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation was cancelled by an explicit abort.
    #[error("operation aborted")]
    Aborted,
}

impl Error {
    /// Build a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Build a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    /// Build a transport failure error.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Returns true if this error poisons the stream it occurred on.
    ///
    /// Protocol and codec errors are unrecoverable for the affected decode
    /// stream; transport and close errors only settle the affected
    /// connection's status.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol { .. } | Error::Codec { .. })
    }
}

/// Convenience result type for crpc operations.
pub type Result<T> = std::result::Result<T, Error>;
