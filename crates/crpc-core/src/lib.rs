//! crpc-core: Connection multiplexing over a single byte-stream transport.
//!
//! This crate provides:
//! - Length-prefixed frame codec with a byte window for partial input
//! - Connection abstraction with half-duplex close and status futures
//! - Multiplexing of logical byte channels over one transport connection
//! - Logging setup

pub mod connection;
pub mod constants;
pub mod error;
pub mod framing;
pub mod logging;
pub mod mux;
pub mod status;

pub use connection::{Connection, ConnectionControl, ConnectionSink, ItemSink, Metadata};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use mux::{LogicalConnection, MuxHandle, Multiplexer, Packet};
pub use status::CloseStatus;
