//! Node — owns the mesh link and the receiver, feeds one into the other.
//!
//! Everything runs on a single task. The receiver is never shared, so it
//! needs no lock; replies go out synchronously on the same link.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use meshtx_core::receiver::{Receiver, ReceiverStats, SessionView};
use meshtx_core::transport::DeliverySink;

use crate::udp::UdpMeshTransport;

/// How often receiver counters are logged when they have changed.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

pub struct Node<S> {
    transport: Arc<UdpMeshTransport>,
    receiver: Receiver<S>,
}

impl<S: DeliverySink> Node<S> {
    pub fn new(transport: Arc<UdpMeshTransport>, receiver: Receiver<S>) -> Self {
        Self {
            transport,
            receiver,
        }
    }

    pub fn transport(&self) -> &Arc<UdpMeshTransport> {
        &self.transport
    }

    pub fn session(&self) -> SessionView {
        self.receiver.session()
    }

    /// Receive until shutdown. Returns the final counters.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<ReceiverStats> {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        let mut last_logged = ReceiverStats::default();

        tracing::info!(node = %self.transport.node_id(), "node receiving");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("node shutting down");
                    let stats = self.receiver.stats();
                    log_stats(&stats);
                    return Ok(stats);
                }

                _ = interval.tick() => {
                    let stats = self.receiver.stats();
                    if stats != last_logged {
                        log_stats(&stats);
                        last_logged = stats;
                    }
                }

                packet = self.transport.recv_packet() => {
                    let packet = packet?;
                    if packet.want_ack {
                        tracing::trace!(from = %packet.from, "link ack requested");
                    }
                    let disposition = self.receiver.handle_packet(
                        packet.from,
                        &packet.payload,
                        self.transport.as_ref(),
                    );
                    tracing::trace!(from = %packet.from, ?disposition, "packet handled");
                }
            }
        }
    }
}

fn log_stats(stats: &ReceiverStats) {
    tracing::info!(
        started = stats.started,
        completed = stats.completed,
        rejected_oversize = stats.rejected_oversize,
        overflows = stats.overflows,
        checksum_failures = stats.checksum_failures,
        missing_chunks = stats.missing_chunks,
        ignored = stats.ignored_frames,
        malformed = stats.malformed_frames,
        acks_seen = stats.acks_seen,
        errors_seen = stats.errors_seen,
        "receiver stats"
    );
}
