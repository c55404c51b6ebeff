//! Delivery — what happens to a payload once it has reassembled and verified.
//!
//! Every delivery is logged with a hex preview of its first and last 32
//! bytes. With a spool directory configured, the payload is also written as
//! `<source>-<unix_ms>-<seq>.bin` next to a JSON sidecar. With a channel
//! attached, the payload is forwarded to whoever holds the other end.
//!
//! Spool writes are plain blocking `std::fs` calls made on the node task.
//! Payloads are capped at 2 KiB, so each delivery costs two small writes;
//! move them to `spawn_blocking` before raising that cap.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use meshtx_core::checksum::checksum;
use meshtx_core::transport::{DeliverySink, NodeId};

const PREVIEW_BYTES: usize = 32;

/// A verified payload and where it came from.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub source: NodeId,
    pub payload: Bytes,
    pub received_at_ms: u64,
}

/// Sidecar written next to each spooled payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub source: String,
    pub len: usize,
    pub checksum: u32,
    pub received_at_ms: u64,
}

pub struct SpoolSink {
    spool_dir: Option<PathBuf>,
    forward: Option<mpsc::UnboundedSender<Delivery>>,
    seq: u64,
}

impl SpoolSink {
    pub fn new(spool_dir: Option<PathBuf>) -> Self {
        Self {
            spool_dir,
            forward: None,
            seq: 0,
        }
    }

    /// Also forward each delivery on a channel.
    pub fn with_channel(mut self, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        self.forward = Some(tx);
        self
    }

    fn spool(&mut self, dir: &Path, delivery: &Delivery) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create spool dir {}", dir.display()))?;

        self.seq += 1;
        let stem = format!(
            "{:08x}-{}-{}",
            delivery.source.0, delivery.received_at_ms, self.seq
        );
        let path = dir.join(format!("{stem}.bin"));
        std::fs::write(&path, &delivery.payload)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let record = DeliveryRecord {
            source: delivery.source.to_string(),
            len: delivery.payload.len(),
            checksum: checksum(&delivery.payload),
            received_at_ms: delivery.received_at_ms,
        };
        let sidecar = dir.join(format!("{stem}.json"));
        std::fs::write(&sidecar, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("failed to write {}", sidecar.display()))?;

        Ok(path)
    }
}

impl DeliverySink for SpoolSink {
    fn on_payload_ready(&mut self, payload: &[u8], source: NodeId) {
        let delivery = Delivery {
            source,
            payload: Bytes::copy_from_slice(payload),
            received_at_ms: unix_ms(),
        };

        let (head, tail) = hex_preview(payload);
        tracing::info!(
            from = %source,
            size = payload.len(),
            start = head,
            end = tail.as_deref().unwrap_or(""),
            "payload delivered"
        );

        if let Some(dir) = self.spool_dir.clone() {
            match self.spool(&dir, &delivery) {
                Ok(path) => tracing::info!(path = %path.display(), "payload spooled"),
                Err(e) => tracing::warn!(error = %e, "failed to spool payload"),
            }
        }

        if let Some(tx) = &self.forward {
            if tx.send(delivery).is_err() {
                tracing::debug!("delivery channel closed, not forwarding");
                self.forward = None;
            }
        }
    }
}

/// Hex of the first 32 bytes, and of up to 32 trailing bytes after those.
pub fn hex_preview(payload: &[u8]) -> (String, Option<String>) {
    let head = hex::encode(&payload[..payload.len().min(PREVIEW_BYTES)]);
    let tail = (payload.len() > PREVIEW_BYTES).then(|| {
        let tail_len = (payload.len() - PREVIEW_BYTES).min(PREVIEW_BYTES);
        hex::encode(&payload[payload.len() - tail_len..])
    });
    (head, tail)
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
