//! In-memory transport. Records every packet instead of sending it.
//!
//! Used by tests across the workspace and for dry runs of a transfer plan.

use std::collections::HashSet;
use std::sync::Mutex;

use bytes::Bytes;

use crate::transport::{NodeId, Transport, TransportError};
use crate::wire::{Frame, MessageType, MAX_PACKET};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub to: NodeId,
    pub payload: Bytes,
    pub want_ack: bool,
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<SentPacket>,
    fail_all: bool,
    fail_kinds: HashSet<MessageType>,
}

#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<State>,
    max_packet: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_max_packet(MAX_PACKET)
    }

    pub fn with_max_packet(max_packet: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_packet,
        }
    }

    /// Make every send fail with `Unavailable`.
    pub fn fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// Make sends of one frame type fail with `Unavailable`.
    pub fn fail_kind(&self, kind: MessageType) {
        self.lock().fail_kinds.insert(kind);
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.lock().sent.clone()
    }

    /// Decoded frames sent to `to`, in order. Undecodable packets are skipped.
    pub fn frames_to(&self, to: NodeId) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .filter(|p| p.to == to)
            .filter_map(|p| Frame::decode(&p.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.lock().sent.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-send; the log is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, to: NodeId, payload: Bytes, want_ack: bool) -> Result<(), TransportError> {
        if payload.len() > self.max_packet {
            return Err(TransportError::PacketTooLarge {
                len: payload.len(),
                max: self.max_packet,
            });
        }
        let mut state = self.lock();
        let kind = payload
            .first()
            .and_then(|&tag| MessageType::try_from(tag).ok());
        if state.fail_all || kind.is_some_and(|k| state.fail_kinds.contains(&k)) {
            return Err(TransportError::Unavailable("injected failure".into()));
        }
        state.sent.push(SentPacket {
            to,
            payload,
            want_ack,
        });
        Ok(())
    }

    fn max_packet(&self) -> usize {
        self.max_packet
    }
}
