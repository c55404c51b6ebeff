//! UDP stand-in for the mesh radio link.
//!
//! One datagram carries one mesh packet:
//!
//!   from(4, big-endian) | flags(1) | frame bytes
//!
//! Flag bit 0 mirrors the link-level `want_ack` request. The emulated link
//! carries the flag but does not generate link acknowledgements.
//!
//! Peers are addressed by node id. The table is seeded from config and
//! learns the source address of every well-formed inbound datagram, so a
//! node can reply to a sender it was never told about.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::net::UdpSocket;

use meshtx_core::transport::{NodeId, Transport, TransportError};
use meshtx_core::wire::MAX_PACKET;

pub const ENVELOPE_LEN: usize = 5;
const FLAG_WANT_ACK: u8 = 0x01;

/// A packet lifted off the link.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub from: NodeId,
    pub want_ack: bool,
    pub payload: Bytes,
    pub addr: SocketAddr,
}

pub fn encode_envelope(from: NodeId, want_ack: bool, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ENVELOPE_LEN + payload.len());
    buf.put_u32(from.0);
    buf.put_u8(if want_ack { FLAG_WANT_ACK } else { 0 });
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a datagram into (source, want_ack, packet payload).
pub fn decode_envelope(datagram: &[u8]) -> Option<(NodeId, bool, &[u8])> {
    if datagram.len() < ENVELOPE_LEN {
        return None;
    }
    let from = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
    let want_ack = datagram[4] & FLAG_WANT_ACK != 0;
    Some((NodeId(from), want_ack, &datagram[ENVELOPE_LEN..]))
}

pub struct UdpMeshTransport {
    socket: Arc<UdpSocket>,
    node_id: NodeId,
    peers: DashMap<NodeId, SocketAddr>,
    max_packet: usize,
}

impl UdpMeshTransport {
    pub async fn bind<I>(node_id: NodeId, addr: SocketAddr, peers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NodeId, SocketAddr)>,
    {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind mesh link socket on {addr}"))?;
        // try_send_to only succeeds once the reactor has seen the socket writable.
        socket
            .writable()
            .await
            .context("mesh link socket never became writable")?;
        let transport = Self {
            socket: Arc::new(socket),
            node_id,
            peers: peers.into_iter().collect(),
            max_packet: MAX_PACKET,
        };
        tracing::info!(
            node = %node_id,
            addr = %transport.local_addr()?,
            peers = transport.peers.len(),
            "mesh link bound"
        );
        Ok(transport)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("mesh link socket has no local address")
    }

    pub fn add_peer(&self, node_id: NodeId, addr: SocketAddr) {
        self.peers.insert(node_id, addr);
    }

    pub fn peer_addr(&self, node_id: NodeId) -> Option<SocketAddr> {
        self.peers.get(&node_id).map(|e| *e.value())
    }

    /// Wait for the next well-formed datagram. Runts are logged and skipped.
    pub async fn recv_packet(&self) -> Result<InboundPacket> {
        let mut buf = vec![0u8; ENVELOPE_LEN + MAX_PACKET + 64];
        loop {
            let (len, addr) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("recv_from failed")?;

            let Some((from, want_ack, payload)) = decode_envelope(&buf[..len]) else {
                tracing::trace!(%addr, len, "datagram shorter than envelope, discarding");
                continue;
            };
            if from == self.node_id {
                tracing::trace!(%addr, "own packet echoed back, discarding");
                continue;
            }

            if self.peers.insert(from, addr) != Some(addr) {
                tracing::debug!(node = %from, %addr, "learned peer address");
            }

            return Ok(InboundPacket {
                from,
                want_ack,
                payload: Bytes::copy_from_slice(payload),
                addr,
            });
        }
    }

    /// Wait until the socket can take another datagram.
    pub async fn writable(&self) -> Result<()> {
        self.socket
            .writable()
            .await
            .context("mesh link socket not writable")
    }

    fn send_one(&self, addr: SocketAddr, datagram: &[u8]) -> Result<(), TransportError> {
        match self.socket.try_send_to(datagram, addr) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(TransportError::Unavailable("link busy".into()))
            }
            Err(e) => Err(TransportError::Unavailable(e.to_string())),
        }
    }
}

impl UdpMeshTransport {
    /// Send to every known peer. Fails only when no peer could be reached.
    fn fan_out(&self, datagram: &[u8]) -> Result<(), TransportError> {
        let targets: Vec<(NodeId, SocketAddr)> =
            self.peers.iter().map(|e| (*e.key(), *e.value())).collect();

        let mut reached = 0;
        let mut last_err = None;
        for (peer, addr) in targets {
            match self.send_one(addr, datagram) {
                Ok(()) => reached += 1,
                Err(e) => {
                    tracing::warn!(%peer, %addr, error = %e, "broadcast to peer failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if reached == 0 => Err(e),
            _ if reached == 0 => Err(TransportError::UnknownPeer(NodeId::BROADCAST)),
            _ => Ok(()),
        }
    }
}

impl Transport for UdpMeshTransport {
    fn send(&self, to: NodeId, payload: Bytes, want_ack: bool) -> Result<(), TransportError> {
        if payload.len() > self.max_packet {
            return Err(TransportError::PacketTooLarge {
                len: payload.len(),
                max: self.max_packet,
            });
        }
        let datagram = encode_envelope(self.node_id, want_ack, &payload);

        if to.is_broadcast() {
            return self.fan_out(&datagram);
        }

        let addr = self.peer_addr(to).ok_or(TransportError::UnknownPeer(to))?;
        self.send_one(addr, &datagram)?;
        tracing::trace!(%to, %addr, len = payload.len(), want_ack, "packet sent");
        Ok(())
    }

    fn max_packet(&self) -> usize {
        self.max_packet
    }
}
