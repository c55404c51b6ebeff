//! Paced sending — drive a transfer plan on the tokio runtime.

use std::future::Future;
use std::time::Duration;

use meshtx_core::memory::MemoryTransport;
use meshtx_core::sender::{transmit, SendError, SendReport, TransferPlan, Transmit};
use meshtx_core::transport::{Transport, TransportError};
use meshtx_core::wire::Frame;

use crate::udp::UdpMeshTransport;

/// A transport the paced driver can wait on before each packet.
pub trait PacedLink: Transport {
    /// Resolves once the link can take another packet.
    fn ready(&self) -> impl Future<Output = ()>;
}

impl PacedLink for UdpMeshTransport {
    async fn ready(&self) {
        if let Err(e) = self.writable().await {
            tracing::warn!(error = %e, "mesh link readiness check failed");
        }
    }
}

impl PacedLink for MemoryTransport {
    async fn ready(&self) {}
}

/// Send every packet of `plan`, sleeping between chunks.
///
/// Each packet waits for the link to become writable first. A START or END
/// the link reports busy gets one more wait before the transfer is abandoned.
/// The sleep yields to the runtime, so inbound traffic on other tasks keeps
/// flowing while a transfer is paced out.
pub async fn send_paced<T>(transport: &T, plan: &TransferPlan) -> Result<SendReport, SendError>
where
    T: PacedLink + ?Sized,
{
    let mut report = SendReport {
        transfer_id: plan.transfer_id,
        frames_sent: 0,
        chunks_skipped: 0,
    };

    for packet in &plan.packets {
        transport.ready().await;
        let outcome = match transmit(transport, plan.dest, packet) {
            Err(SendError::Transport(TransportError::Unavailable(reason))) => {
                tracing::debug!(kind = %packet.frame.kind(), reason, "link busy, waiting once more");
                transport.ready().await;
                transmit(transport, plan.dest, packet)?
            }
            other => other?,
        };
        match outcome {
            Transmit::Sent => report.frames_sent += 1,
            Transmit::Skipped => report.chunks_skipped += 1,
        }
        if !packet.delay_after.is_zero() {
            tokio::time::sleep(packet.delay_after).await;
        }
    }

    tracing::info!(
        dest = %plan.dest,
        transfer_id = hex::encode(plan.transfer_id.to_be_bytes()),
        frames = report.frames_sent,
        skipped = report.chunks_skipped,
        "transfer sent"
    );
    Ok(report)
}

/// Control frames seen for one transfer while waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replies {
    pub acks: usize,
    pub errors: Vec<String>,
}

impl Replies {
    /// START and END each draw an ACK from a receiver that took the payload.
    pub fn confirmed(&self) -> bool {
        self.acks >= 2 && self.errors.is_empty()
    }
}

/// Listen on `transport` for ACK/ERROR frames about `transfer_id` until
/// `window` elapses. Purely observational: nothing is retried.
pub async fn collect_replies(
    transport: &UdpMeshTransport,
    transfer_id: u32,
    window: Duration,
) -> Replies {
    let mut replies = Replies::default();
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let packet = match tokio::time::timeout_at(deadline, transport.recv_packet()).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "stopped waiting for replies");
                break;
            }
            Ok(Ok(p)) => p,
        };

        match Frame::decode(&packet.payload) {
            Ok(Frame::Ack { transfer_id: id }) if id == transfer_id => {
                replies.acks += 1;
                tracing::info!(from = %packet.from, transfer_id = hex::encode(id.to_be_bytes()), "ACK received");
                if replies.acks >= 2 {
                    break;
                }
            }
            Ok(Frame::Error {
                transfer_id: id,
                message,
            }) if id == transfer_id || id == 0 => {
                tracing::warn!(from = %packet.from, transfer_id = hex::encode(id.to_be_bytes()), message, "ERROR received");
                replies.errors.push(message);
                break;
            }
            Ok(other) => {
                tracing::debug!(from = %packet.from, kind = %other.kind(), "unrelated frame while waiting");
            }
            Err(e) => {
                tracing::debug!(from = %packet.from, error = %e, "undecodable frame while waiting");
            }
        }
    }
    replies
}
