//! Receive state machine — one in-flight inbound transfer at a time.
//!
//! START opens (or replaces) the session, CHUNK appends to the bounded buffer,
//! END verifies the checksum and hands the payload to the delivery sink.
//! Every failure that is reported to the peer also returns the session to
//! Idle with a zeroed buffer.
//!
//! The session remembers which node sent START. CHUNK and END frames carrying
//! the right transfer id but arriving from a different node are ignored, so two
//! peers can never write into the same buffer. A START from any node still
//! replaces whatever is in flight.

use serde::Serialize;

use crate::buffer::PayloadBuffer;
use crate::checksum::checksum;
use crate::transport::{DeliverySink, NodeId, Transport};
use crate::wire::{reason, Frame, MessageType, WireError, MAX_PAYLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Receiving,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverOptions {
    /// Reject END when fewer CHUNK frames arrived than START announced.
    /// Off by default: the checksum alone decides.
    pub strict_chunk_count: bool,
}

/// What the receiver did with one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// START accepted and acknowledged.
    Started { transfer_id: u32 },
    /// CHUNK appended; `len` is the buffered total.
    Buffered { index: u8, len: usize },
    /// Payload verified and handed to the sink.
    Delivered { transfer_id: u32, len: usize },
    /// ACK or ERROR from a peer. Logged only.
    Observed(MessageType),
    /// Failure reported to the peer with an ERROR frame.
    Rejected(Rejection),
    /// Dropped without a reply.
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidStart,
    TooLarge { total_len: u16 },
    Overflow { len: usize, extra: usize },
    Checksum { received: u32, computed: u32 },
    MissingChunks { expected: u8, received: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownType(u8),
    Malformed(WireError),
    /// No session, or the transfer id does not match it.
    StaleTransfer { transfer_id: u32 },
    /// Matching transfer id, wrong sender.
    ForeignSource { source: NodeId },
}

/// Read-only snapshot of the session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub transfer_id: u32,
    pub source: Option<NodeId>,
    pub expected_chunks: u8,
    pub received_chunks: u32,
    pub buffered: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub started: u64,
    pub completed: u64,
    pub rejected_oversize: u64,
    pub overflows: u64,
    pub checksum_failures: u64,
    pub missing_chunks: u64,
    pub ignored_frames: u64,
    pub malformed_frames: u64,
    pub acks_seen: u64,
    pub errors_seen: u64,
}

struct Session {
    state: SessionState,
    transfer_id: u32,
    source: Option<NodeId>,
    expected_chunks: u8,
    received_chunks: u32,
    buffer: PayloadBuffer,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            transfer_id: 0,
            source: None,
            expected_chunks: 0,
            received_chunks: 0,
            buffer: PayloadBuffer::new(),
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.transfer_id = 0;
        self.source = None;
        self.expected_chunks = 0;
        self.received_chunks = 0;
        self.buffer.clear();
    }

    fn begin(&mut self, transfer_id: u32, source: NodeId, expected_chunks: u8) {
        self.reset();
        self.state = SessionState::Receiving;
        self.transfer_id = transfer_id;
        self.source = Some(source);
        self.expected_chunks = expected_chunks;
    }

    /// Ok if the frame belongs to this session.
    fn admits(&self, transfer_id: u32, from: NodeId) -> Result<(), IgnoreReason> {
        if self.state != SessionState::Receiving || transfer_id != self.transfer_id {
            return Err(IgnoreReason::StaleTransfer { transfer_id });
        }
        if self.source != Some(from) {
            return Err(IgnoreReason::ForeignSource { source: from });
        }
        Ok(())
    }
}

pub struct Receiver<S> {
    session: Session,
    sink: S,
    options: ReceiverOptions,
    stats: ReceiverStats,
}

impl<S: DeliverySink> Receiver<S> {
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, ReceiverOptions::default())
    }

    pub fn with_options(sink: S, options: ReceiverOptions) -> Self {
        tracing::info!(
            max_payload = MAX_PAYLOAD,
            strict_chunk_count = options.strict_chunk_count,
            "receiver initialized"
        );
        Self {
            session: Session::idle(),
            sink,
            options,
            stats: ReceiverStats::default(),
        }
    }

    pub fn session(&self) -> SessionView {
        SessionView {
            state: self.session.state,
            transfer_id: self.session.transfer_id,
            source: self.session.source,
            expected_chunks: self.session.expected_chunks,
            received_chunks: self.session.received_chunks,
            buffered: self.session.buffer.len(),
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Handle one inbound packet from `from`. Replies go out on `transport`.
    pub fn handle_packet<T>(&mut self, from: NodeId, bytes: &[u8], transport: &T) -> Disposition
    where
        T: Transport + ?Sized,
    {
        match Frame::decode(bytes) {
            Ok(frame) => {
                tracing::debug!(
                    %from,
                    kind = %frame.kind(),
                    transfer_id = hex::encode(frame.transfer_id().to_be_bytes()),
                    len = bytes.len(),
                    "frame received"
                );
                self.handle_frame(from, frame, transport)
            }
            Err(WireError::TooShort {
                kind: MessageType::Start,
                len,
                ..
            }) => {
                tracing::warn!(%from, len, "START too short");
                self.stats.malformed_frames += 1;
                // The id cannot be parsed from a truncated START.
                self.reply_error(transport, from, 0, reason::INVALID_START);
                Disposition::Rejected(Rejection::InvalidStart)
            }
            Err(WireError::UnknownType(tag)) => {
                tracing::warn!(%from, tag = format_args!("0x{tag:02x}"), "unknown message type");
                self.stats.ignored_frames += 1;
                Disposition::Ignored(IgnoreReason::UnknownType(tag))
            }
            Err(e) => {
                tracing::warn!(%from, error = %e, "malformed frame, dropping");
                self.stats.malformed_frames += 1;
                Disposition::Ignored(IgnoreReason::Malformed(e))
            }
        }
    }

    pub fn handle_frame<T>(&mut self, from: NodeId, frame: Frame, transport: &T) -> Disposition
    where
        T: Transport + ?Sized,
    {
        match frame {
            Frame::Start {
                transfer_id,
                total_len,
                num_chunks,
            } => self.on_start(from, transfer_id, total_len, num_chunks, transport),
            Frame::Chunk {
                transfer_id,
                index,
                data,
            } => self.on_chunk(from, transfer_id, index, &data, transport),
            Frame::End {
                transfer_id,
                checksum,
            } => self.on_end(from, transfer_id, checksum, transport),
            Frame::Ack { transfer_id } => {
                self.stats.acks_seen += 1;
                tracing::info!(
                    %from,
                    transfer_id = hex::encode(transfer_id.to_be_bytes()),
                    "ACK received"
                );
                Disposition::Observed(MessageType::Ack)
            }
            Frame::Error {
                transfer_id,
                message,
            } => {
                self.stats.errors_seen += 1;
                tracing::warn!(
                    %from,
                    transfer_id = hex::encode(transfer_id.to_be_bytes()),
                    message,
                    "ERROR received"
                );
                Disposition::Observed(MessageType::Error)
            }
        }
    }

    fn on_start<T>(
        &mut self,
        from: NodeId,
        transfer_id: u32,
        total_len: u16,
        num_chunks: u8,
        transport: &T,
    ) -> Disposition
    where
        T: Transport + ?Sized,
    {
        let id = hex::encode(transfer_id.to_be_bytes());

        if usize::from(total_len) > MAX_PAYLOAD {
            tracing::warn!(%from, transfer_id = id.as_str(), total_len, max = MAX_PAYLOAD, "transfer too large");
            self.stats.rejected_oversize += 1;
            self.reply_error(transport, from, transfer_id, reason::TOO_LARGE);
            return Disposition::Rejected(Rejection::TooLarge { total_len });
        }

        if self.session.state == SessionState::Receiving {
            tracing::warn!(
                displaced = hex::encode(self.session.transfer_id.to_be_bytes()),
                displaced_from = ?self.session.source,
                buffered = self.session.buffer.len(),
                "new START replaces in-flight transfer"
            );
        }

        tracing::info!(%from, transfer_id = id.as_str(), total_len, num_chunks, "starting receive");
        self.session.begin(transfer_id, from, num_chunks);
        self.stats.started += 1;
        self.reply(transport, from, Frame::Ack { transfer_id });
        Disposition::Started { transfer_id }
    }

    fn on_chunk<T>(
        &mut self,
        from: NodeId,
        transfer_id: u32,
        index: u8,
        data: &[u8],
        transport: &T,
    ) -> Disposition
    where
        T: Transport + ?Sized,
    {
        if let Err(why) = self.session.admits(transfer_id, from) {
            return self.ignore(from, transfer_id, MessageType::Chunk, why);
        }

        if let Err(e) = self.session.buffer.try_extend(data) {
            tracing::warn!(
                %from,
                transfer_id = hex::encode(transfer_id.to_be_bytes()),
                error = %e,
                "buffer overflow, resetting"
            );
            let len = self.session.buffer.len();
            self.session.reset();
            self.stats.overflows += 1;
            self.reply_error(transport, from, transfer_id, reason::OVERFLOW);
            return Disposition::Rejected(Rejection::Overflow {
                len,
                extra: data.len(),
            });
        }

        self.session.received_chunks = self.session.received_chunks.saturating_add(1);
        tracing::debug!(
            chunk = u32::from(index) + 1,
            of = self.session.expected_chunks,
            len = data.len(),
            buffered = self.session.buffer.len(),
            "chunk buffered"
        );
        Disposition::Buffered {
            index,
            len: self.session.buffer.len(),
        }
    }

    fn on_end<T>(&mut self, from: NodeId, transfer_id: u32, received: u32, transport: &T) -> Disposition
    where
        T: Transport + ?Sized,
    {
        if let Err(why) = self.session.admits(transfer_id, from) {
            return self.ignore(from, transfer_id, MessageType::End, why);
        }
        let id = hex::encode(transfer_id.to_be_bytes());

        let expected = self.session.expected_chunks;
        let got = self.session.received_chunks;
        if got < u32::from(expected) {
            if self.options.strict_chunk_count {
                tracing::warn!(%from, transfer_id = id.as_str(), expected, received = got, "END before all chunks");
                self.session.reset();
                self.stats.missing_chunks += 1;
                self.reply_error(transport, from, transfer_id, reason::MISSING_CHUNKS);
                return Disposition::Rejected(Rejection::MissingChunks {
                    expected,
                    received: got,
                });
            }
            tracing::debug!(expected, received = got, "END with fewer chunks than announced");
        }

        let computed = checksum(self.session.buffer.as_slice());
        if computed != received {
            tracing::warn!(
                %from,
                transfer_id = id.as_str(),
                calc = format_args!("0x{computed:08x}"),
                recv = format_args!("0x{received:08x}"),
                "checksum mismatch"
            );
            self.session.reset();
            self.stats.checksum_failures += 1;
            self.reply_error(transport, from, transfer_id, reason::CHECKSUM);
            return Disposition::Rejected(Rejection::Checksum { received, computed });
        }

        let len = self.session.buffer.len();
        tracing::info!(%from, transfer_id = id.as_str(), len, "transfer complete");
        self.sink.on_payload_ready(self.session.buffer.as_slice(), from);
        self.reply(transport, from, Frame::Ack { transfer_id });
        self.session.reset();
        self.stats.completed += 1;
        Disposition::Delivered { transfer_id, len }
    }

    fn ignore(
        &mut self,
        from: NodeId,
        transfer_id: u32,
        kind: MessageType,
        why: IgnoreReason,
    ) -> Disposition {
        tracing::warn!(
            %from,
            %kind,
            transfer_id = hex::encode(transfer_id.to_be_bytes()),
            active = hex::encode(self.session.transfer_id.to_be_bytes()),
            reason = ?why,
            "frame does not belong to the active transfer"
        );
        self.stats.ignored_frames += 1;
        Disposition::Ignored(why)
    }

    fn reply_error<T>(&self, transport: &T, to: NodeId, transfer_id: u32, message: &str)
    where
        T: Transport + ?Sized,
    {
        tracing::warn!(%to, transfer_id = hex::encode(transfer_id.to_be_bytes()), message, "sending ERROR");
        self.reply(
            transport,
            to,
            Frame::Error {
                transfer_id,
                message: message.to_string(),
            },
        );
    }

    fn reply<T>(&self, transport: &T, to: NodeId, frame: Frame)
    where
        T: Transport + ?Sized,
    {
        let kind = frame.kind();
        if let Err(e) = transport.send(to, frame.encode(), false) {
            tracing::warn!(%to, %kind, error = %e, "failed to send reply");
        }
    }
}
