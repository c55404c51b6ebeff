//! meshtx-core — chunked payload transfer over a small-packet mesh link.
//! Wire format, integrity check, receive state machine, and sender planning.
//! No I/O happens here; transports and sinks are plugged in through traits.

pub mod buffer;
pub mod checksum;
pub mod config;
pub mod memory;
pub mod receiver;
pub mod sender;
pub mod transport;
pub mod wire;

pub use receiver::{Disposition, Receiver, ReceiverOptions, ReceiverStats, SessionState};
pub use sender::{ChunkedSender, Pacing, SendError, SendReport, TransferPlan};
pub use transport::{DeliverySink, NodeId, Transport, TransportError};
pub use wire::{Frame, MessageType, WireError};
