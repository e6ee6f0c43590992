//! Protocol and configuration constants for crpc.

// =============================================================================
// Framing Constants
// =============================================================================

/// Length of the frame header (4 bytes, little-endian u32).
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum frame payload size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Terminator sentinel marking clean end-of-stream.
///
/// Read as a length prefix this is `u32::MAX`, which exceeds
/// [`MAX_FRAME_SIZE`], so it can never open a valid frame.
pub const TERMINATOR: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

// =============================================================================
// Queue Capacities
// =============================================================================

/// Buffered items in a connection's exposed source before the relay suspends.
pub const SOURCE_QUEUE_CAPACITY: usize = 32;

/// Buffered items in a connection's exposed sink before writers suspend.
pub const SINK_QUEUE_CAPACITY: usize = 32;

/// Pending inbound logical connections before dispatch suspends.
pub const INBOUND_QUEUE_CAPACITY: usize = 16;

/// Pending multiplexer commands (opens, settle notifications).
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Read chunk size for byte-stream adapters.
pub const IO_CHUNK_SIZE: usize = 8 * 1024;
