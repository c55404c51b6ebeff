//! meshtx-services — runtime pieces around the protocol core: the UDP mesh
//! link, paced sending, payload delivery, and the node receive loop.

pub mod delivery;
pub mod node;
pub mod send;
pub mod udp;

pub use delivery::{Delivery, SpoolSink};
pub use node::Node;
pub use send::{collect_replies, send_paced, PacedLink, Replies};
pub use udp::{InboundPacket, UdpMeshTransport};
