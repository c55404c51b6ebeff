//! Chunked sender — turns a payload into a START → CHUNK* → END sequence.
//!
//! Planning is pure: `plan_transfer` builds every frame up front and records
//! the pacing delay that should follow each one. Drivers decide how to wait.
//! `send_blocking` sleeps the calling thread; the async driver in
//! meshtx-services yields to the runtime instead.

use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::checksum::checksum;
use crate::transport::{NodeId, Transport, TransportError};
use crate::wire::{Frame, CHUNK_SIZE, MAX_PAYLOAD};

/// Default spacing between CHUNK frames.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Throughput control between CHUNK emissions. Not a correctness mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub chunk_interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub frame: Frame,
    /// Ask the link layer to confirm delivery. START and END only.
    pub want_ack: bool,
    /// How long to wait after handing this packet to the transport.
    pub delay_after: Duration,
}

#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub transfer_id: u32,
    pub dest: NodeId,
    pub total_len: usize,
    pub checksum: u32,
    pub packets: Vec<OutboundPacket>,
}

impl TransferPlan {
    pub fn chunk_count(&self) -> usize {
        self.packets.len().saturating_sub(2)
    }
}

/// Outcome of a driver run. Success means every START/END reached the
/// transport, not that the receiver confirmed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub transfer_id: u32,
    pub frames_sent: usize,
    pub chunks_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// Build the full frame sequence for one transfer.
pub fn plan_transfer(
    dest: NodeId,
    payload: Bytes,
    transfer_id: u32,
    pacing: Pacing,
) -> Result<TransferPlan, SendError> {
    check_size(payload.len())?;

    let num_chunks = chunk_count(payload.len());
    let sum = checksum(&payload);
    let mut packets = Vec::with_capacity(num_chunks + 2);

    // Bounded by check_size: 2048 fits u16, 12 chunks fit u8.
    packets.push(OutboundPacket {
        frame: Frame::Start {
            transfer_id,
            total_len: payload.len() as u16,
            num_chunks: num_chunks as u8,
        },
        want_ack: true,
        delay_after: Duration::ZERO,
    });

    for i in 0..num_chunks {
        let offset = i * CHUNK_SIZE;
        let end = (offset + CHUNK_SIZE).min(payload.len());
        packets.push(OutboundPacket {
            frame: Frame::Chunk {
                transfer_id,
                index: i as u8,
                data: payload.slice(offset..end),
            },
            want_ack: false,
            delay_after: pacing.chunk_interval,
        });
    }

    packets.push(OutboundPacket {
        frame: Frame::End {
            transfer_id,
            checksum: sum,
        },
        want_ack: true,
        delay_after: Duration::ZERO,
    });

    Ok(TransferPlan {
        transfer_id,
        dest,
        total_len: payload.len(),
        checksum: sum,
        packets,
    })
}

fn check_size(len: usize) -> Result<(), SendError> {
    if len > MAX_PAYLOAD {
        tracing::warn!(len, max = MAX_PAYLOAD, "payload too large to send");
        return Err(SendError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

/// Whether a packet went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    Sent,
    /// A CHUNK the transport refused. The transfer continues without it.
    Skipped,
}

/// Hand one planned packet to the transport.
///
/// A refused CHUNK is logged and skipped; the receiver's checksum will catch
/// the gap. A refused START or END fails the whole transfer.
pub fn transmit<T>(transport: &T, dest: NodeId, packet: &OutboundPacket) -> Result<Transmit, SendError>
where
    T: Transport + ?Sized,
{
    let bytes = packet.frame.encode();
    let max = transport.max_packet();
    let sent = if bytes.len() > max {
        Err(TransportError::PacketTooLarge {
            len: bytes.len(),
            max,
        })
    } else {
        transport.send(dest, bytes, packet.want_ack)
    };
    match sent {
        Ok(()) => {
            if let Frame::Chunk { index, data, .. } = &packet.frame {
                tracing::debug!(%dest, chunk = u32::from(*index) + 1, len = data.len(), "chunk sent");
            }
            Ok(Transmit::Sent)
        }
        Err(e) if matches!(packet.frame, Frame::Chunk { .. }) => {
            tracing::warn!(%dest, error = %e, "chunk not sent, skipping");
            Ok(Transmit::Skipped)
        }
        Err(e) => {
            tracing::warn!(%dest, kind = %packet.frame.kind(), error = %e, "transfer aborted");
            Err(SendError::Transport(e))
        }
    }
}

/// Drive a plan on the current thread, calling `sleep` for each pacing delay.
pub fn send_blocking<T, F>(transport: &T, plan: &TransferPlan, mut sleep: F) -> Result<SendReport, SendError>
where
    T: Transport + ?Sized,
    F: FnMut(Duration),
{
    let mut report = SendReport {
        transfer_id: plan.transfer_id,
        frames_sent: 0,
        chunks_skipped: 0,
    };
    for packet in &plan.packets {
        match transmit(transport, plan.dest, packet)? {
            Transmit::Sent => report.frames_sent += 1,
            Transmit::Skipped => report.chunks_skipped += 1,
        }
        if !packet.delay_after.is_zero() {
            sleep(packet.delay_after);
        }
    }
    tracing::info!(
        transfer_id = hex::encode(plan.transfer_id.to_be_bytes()),
        frames = report.frames_sent,
        skipped = report.chunks_skipped,
        "transfer sent"
    );
    Ok(report)
}

/// Plans transfers with random transfer ids.
pub struct ChunkedSender<R> {
    rng: R,
    pacing: Pacing,
}

impl ChunkedSender<StdRng> {
    pub fn from_entropy(pacing: Pacing) -> Self {
        Self::new(StdRng::from_entropy(), pacing)
    }
}

impl<R: RngCore> ChunkedSender<R> {
    pub fn new(rng: R, pacing: Pacing) -> Self {
        Self { rng, pacing }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Size check first, so an oversize payload never consumes an id.
    pub fn plan(&mut self, dest: NodeId, payload: Bytes) -> Result<TransferPlan, SendError> {
        check_size(payload.len())?;
        let transfer_id = self.rng.next_u32();
        let plan = plan_transfer(dest, payload, transfer_id, self.pacing)?;
        tracing::info!(
            %dest,
            transfer_id = hex::encode(transfer_id.to_be_bytes()),
            size = plan.total_len,
            chunks = plan.chunk_count(),
            "sending transfer"
        );
        Ok(plan)
    }
}
