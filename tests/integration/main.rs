//! meshtx integration test harness.
//!
//! Every test runs two or more in-process nodes on loopback UDP. A receiving
//! node runs the full `Node` loop on its own task; the sending side drives
//! plans or raw frames through its own link and watches for replies.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use meshtx_core::receiver::{Receiver, ReceiverOptions, ReceiverStats};
use meshtx_core::sender::Pacing;
use meshtx_core::transport::NodeId;
use meshtx_services::{Delivery, Node, SpoolSink, UdpMeshTransport};

mod faults;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SENDER: NodeId = NodeId(0x0000_0a01);
pub const RECEIVER: NodeId = NodeId(0x0000_0b02);

/// How long a test waits for any single reply or delivery.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Short chunk spacing keeps the suite fast on loopback.
pub fn fast_pacing() -> Pacing {
    Pacing {
        chunk_interval: Duration::from_millis(5),
    }
}

/// A receiving node on its own task plus a sending link that knows it.
pub struct Pair {
    pub sender: UdpMeshTransport,
    pub receiver_addr: SocketAddr,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<ReceiverStats>>,
}

impl Pair {
    pub async fn spawn(options: ReceiverOptions) -> Result<Self> {
        let rx_link = Arc::new(UdpMeshTransport::bind(RECEIVER, loopback(), []).await?);
        let receiver_addr = rx_link.local_addr()?;
        let sender = UdpMeshTransport::bind(SENDER, loopback(), [(RECEIVER, receiver_addr)]).await?;

        let (deliveries_tx, deliveries) = mpsc::unbounded_channel();
        let sink = SpoolSink::new(None).with_channel(deliveries_tx);
        let node = Node::new(rx_link, Receiver::with_options(sink, options));

        let (shutdown, _) = broadcast::channel(1);
        let handle = tokio::spawn(node.run(shutdown.subscribe()));

        Ok(Self {
            sender,
            receiver_addr,
            deliveries,
            shutdown,
            handle,
        })
    }

    /// Bind another link that can reach the receiver.
    pub async fn extra_link(&self, id: NodeId) -> Result<UdpMeshTransport> {
        UdpMeshTransport::bind(id, loopback(), [(RECEIVER, self.receiver_addr)]).await
    }

    pub async fn next_delivery(&mut self) -> Result<Delivery> {
        tokio::time::timeout(WAIT, self.deliveries.recv())
            .await
            .context("timed out waiting for a delivery")?
            .context("delivery channel closed")
    }

    /// True when nothing is delivered within `window`.
    pub async fn no_delivery_within(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.deliveries.recv())
            .await
            .is_err()
    }

    pub async fn stop(self) -> Result<ReceiverStats> {
        let _ = self.shutdown.send(());
        self.handle.await.context("node task panicked")?
    }
}
