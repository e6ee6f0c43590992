//! crpc-adapters: Concrete transports for crpc connections.
//!
//! This crate provides:
//! - In-process connected pairs for tests and local plumbing
//! - An adapter from any `AsyncRead`/`AsyncWrite` pair to a byte connection

pub mod io;
pub mod local;

pub use io::from_io;
pub use local::{local_pair, local_pair_with_capacity};
