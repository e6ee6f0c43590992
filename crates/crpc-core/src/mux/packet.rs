//! Wire packets exchanged on a multiplexer's transport connection.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::connection::Metadata;
use crate::status::CloseStatus;

/// One packet on the transport, correlated to a logical connection by id.
///
/// A `Data` packet with no payload marks end-of-stream for that direction
/// only (half-close); full closure is communicated by `Close`, which
/// carries the terminal status of the originating side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Open a logical connection with the given correlation id.
    Create { id: String, metadata: Metadata },
    /// Payload bytes for one direction, or half-close when `None`.
    Data {
        id: String,
        payload: Option<Bytes>,
    },
    /// The originating side's logical connection settled.
    Close { id: String, status: CloseStatus },
}

impl Packet {
    /// The correlation id this packet addresses.
    pub fn correlation_id(&self) -> &str {
        match self {
            Packet::Create { id, .. } | Packet::Data { id, .. } | Packet::Close { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{BincodeFormat, FrameFormat};

    #[test]
    fn correlation_id_covers_all_variants() {
        let create = Packet::Create {
            id: "a".into(),
            metadata: Metadata::new(),
        };
        let data = Packet::Data {
            id: "b".into(),
            payload: Some(Bytes::from_static(b"x")),
        };
        let close = Packet::Close {
            id: "c".into(),
            status: CloseStatus::Success,
        };

        assert_eq!(create.correlation_id(), "a");
        assert_eq!(data.correlation_id(), "b");
        assert_eq!(close.correlation_id(), "c");
    }

    #[test]
    fn packets_roundtrip_through_the_frame_format() {
        let format = BincodeFormat;
        let packets = [
            Packet::Create {
                id: "conn".into(),
                metadata: Metadata::from([("k".to_string(), "v".to_string())]),
            },
            Packet::Data {
                id: "conn".into(),
                payload: Some(Bytes::from_static(b"payload")),
            },
            Packet::Data {
                id: "conn".into(),
                payload: None,
            },
            Packet::Close {
                id: "conn".into(),
                status: CloseStatus::error("went wrong"),
            },
        ];

        for packet in packets {
            let bytes = format.encode(&packet).unwrap();
            let back: Packet = format.decode(&bytes).unwrap();
            assert_eq!(back, packet);
        }
    }
}
