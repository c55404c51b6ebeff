//! Seams to the outside world: the packet transport the protocol rides on,
//! and the sink that receives reassembled payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Mesh node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(0xFFFF_FFFF);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    /// Accepts `!1a2b3c4d`, `0x1a2b3c4d`, or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex) = s.strip_prefix('!').or_else(|| s.strip_prefix("0x")) {
            u32::from_str_radix(hex, 16).map(NodeId)
        } else {
            s.parse().map(NodeId)
        }
    }
}

/// Outbound half of the packet transport.
///
/// `want_ack` asks the link layer for a delivery acknowledgement of this
/// packet. It says nothing about protocol-level ACK frames.
pub trait Transport {
    fn send(&self, to: NodeId, payload: Bytes, want_ack: bool) -> Result<(), TransportError>;

    /// Largest payload the transport carries in one packet.
    fn max_packet(&self) -> usize;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, to: NodeId, payload: Bytes, want_ack: bool) -> Result<(), TransportError> {
        (**self).send(to, payload, want_ack)
    }

    fn max_packet(&self) -> usize {
        (**self).max_packet()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("packet of {len} bytes exceeds transport maximum {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("no route to {0}")]
    UnknownPeer(NodeId),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Receives every payload that reassembled and passed its checksum.
///
/// Called at most once per completed transfer, never for a payload that
/// failed verification. The slice is only valid for the duration of the call.
pub trait DeliverySink {
    fn on_payload_ready(&mut self, payload: &[u8], source: NodeId);
}

impl<F> DeliverySink for F
where
    F: FnMut(&[u8], NodeId),
{
    fn on_payload_ready(&mut self, payload: &[u8], source: NodeId) {
        self(payload, source)
    }
}
