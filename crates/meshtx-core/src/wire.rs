//! meshtx wire format — the five frames that carry a payload across the mesh.
//!
//! Byte 0 of every frame is the message-type tag. All multi-byte integers are
//! big-endian. The fixed headers are zerocopy structs built from byte-order
//! wrappers, so they have alignment 1, no padding, and a layout that is checked
//! at compile time. Decoding only checks that a frame is long enough for its
//! declared type; field semantics are the receiver's business.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::{assert_eq_size, const_assert};
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest payload a single transfer can carry.
pub const MAX_PAYLOAD: usize = 2048;

/// Payload bytes per CHUNK frame. Sized so a full CHUNK fits one mesh packet.
pub const CHUNK_SIZE: usize = 180;

/// The chunk index is one byte on the wire.
pub const MAX_CHUNKS: usize = 256;

/// Largest frame the mesh link carries in one packet.
pub const MAX_PACKET: usize = 237;

pub const START_LEN: usize = 8;
pub const CHUNK_HEADER_LEN: usize = 6;
pub const END_LEN: usize = 9;
pub const ACK_LEN: usize = 5;
pub const ERROR_HEADER_LEN: usize = 5;

const_assert!(CHUNK_HEADER_LEN + CHUNK_SIZE <= MAX_PACKET);
const_assert!((MAX_PAYLOAD + CHUNK_SIZE - 1) / CHUNK_SIZE <= MAX_CHUNKS);

/// Error texts carried in ERROR frames. Peers match on these strings.
pub mod reason {
    pub const TOO_LARGE: &str = "TX too large";
    pub const OVERFLOW: &str = "Buffer overflow";
    pub const CHECKSUM: &str = "Checksum error";
    pub const INVALID_START: &str = "Invalid START packet";
    pub const MISSING_CHUNKS: &str = "Missing chunks";
}

// ── Message type ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Start = 0x01,
    Chunk = 0x02,
    End = 0x03,
    Ack = 0x04,
    Error = 0x05,
}

impl MessageType {
    /// Shortest frame of this type the decoder accepts.
    ///
    /// CHUNK requires at least one data byte; the sender never emits an empty
    /// chunk, so a bare header is treated as truncated.
    pub fn min_len(self) -> usize {
        match self {
            MessageType::Start => START_LEN,
            MessageType::Chunk => CHUNK_HEADER_LEN + 1,
            MessageType::End => END_LEN,
            MessageType::Ack => ACK_LEN,
            MessageType::Error => ERROR_HEADER_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Start => "START",
            MessageType::Chunk => "CHUNK",
            MessageType::End => "END",
            MessageType::Ack => "ACK",
            MessageType::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(MessageType::Start),
            0x02 => Ok(MessageType::Chunk),
            0x03 => Ok(MessageType::End),
            0x04 => Ok(MessageType::Ack),
            0x05 => Ok(MessageType::Error),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Fixed headers ─────────────────────────────────────────────────────────────

/// START — opens a transfer.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct StartFrame {
    pub msg_type: u8,
    pub transfer_id: U32<BigEndian>,
    /// Total payload length. Must not exceed MAX_PAYLOAD.
    pub total_len: U16<BigEndian>,
    /// Number of CHUNK frames the sender will emit. Bookkeeping only.
    pub num_chunks: u8,
}

assert_eq_size!(StartFrame, [u8; START_LEN]);

/// CHUNK header. The chunk data follows immediately.
///
/// Wire size: 6 bytes + data.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    pub msg_type: u8,
    pub transfer_id: U32<BigEndian>,
    /// 0-based position of this chunk in the payload.
    pub index: u8,
}

assert_eq_size!(ChunkHeader, [u8; CHUNK_HEADER_LEN]);

/// END — closes a transfer and carries the payload checksum.
///
/// Wire size: 9 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct EndFrame {
    pub msg_type: u8,
    pub transfer_id: U32<BigEndian>,
    /// Sum of all payload bytes, modulo 2^32.
    pub checksum: U32<BigEndian>,
}

assert_eq_size!(EndFrame, [u8; END_LEN]);

/// Shared by ACK (complete frame) and ERROR (header before the message text).
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ControlHeader {
    pub msg_type: u8,
    pub transfer_id: U32<BigEndian>,
}

assert_eq_size!(ControlHeader, [u8; ACK_LEN]);

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded frame. Frames are transient: built to be encoded, or decoded to
/// be handled, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start {
        transfer_id: u32,
        total_len: u16,
        num_chunks: u8,
    },
    Chunk {
        transfer_id: u32,
        index: u8,
        data: Bytes,
    },
    End {
        transfer_id: u32,
        checksum: u32,
    },
    Ack {
        transfer_id: u32,
    },
    Error {
        transfer_id: u32,
        message: String,
    },
}

impl Frame {
    pub fn kind(&self) -> MessageType {
        match self {
            Frame::Start { .. } => MessageType::Start,
            Frame::Chunk { .. } => MessageType::Chunk,
            Frame::End { .. } => MessageType::End,
            Frame::Ack { .. } => MessageType::Ack,
            Frame::Error { .. } => MessageType::Error,
        }
    }

    pub fn transfer_id(&self) -> u32 {
        match self {
            Frame::Start { transfer_id, .. }
            | Frame::Chunk { transfer_id, .. }
            | Frame::End { transfer_id, .. }
            | Frame::Ack { transfer_id }
            | Frame::Error { transfer_id, .. } => *transfer_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Start {
                transfer_id,
                total_len,
                num_chunks,
            } => {
                let header = StartFrame {
                    msg_type: MessageType::Start.into(),
                    transfer_id: U32::new(*transfer_id),
                    total_len: U16::new(*total_len),
                    num_chunks: *num_chunks,
                };
                Bytes::copy_from_slice(header.as_bytes())
            }
            Frame::Chunk {
                transfer_id,
                index,
                data,
            } => {
                let header = ChunkHeader {
                    msg_type: MessageType::Chunk.into(),
                    transfer_id: U32::new(*transfer_id),
                    index: *index,
                };
                let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + data.len());
                buf.put_slice(header.as_bytes());
                buf.put_slice(data);
                buf.freeze()
            }
            Frame::End {
                transfer_id,
                checksum,
            } => {
                let header = EndFrame {
                    msg_type: MessageType::End.into(),
                    transfer_id: U32::new(*transfer_id),
                    checksum: U32::new(*checksum),
                };
                Bytes::copy_from_slice(header.as_bytes())
            }
            Frame::Ack { transfer_id } => {
                let header = ControlHeader {
                    msg_type: MessageType::Ack.into(),
                    transfer_id: U32::new(*transfer_id),
                };
                Bytes::copy_from_slice(header.as_bytes())
            }
            Frame::Error {
                transfer_id,
                message,
            } => {
                let header = ControlHeader {
                    msg_type: MessageType::Error.into(),
                    transfer_id: U32::new(*transfer_id),
                };
                let mut buf = BytesMut::with_capacity(ERROR_HEADER_LEN + message.len() + 1);
                buf.put_slice(header.as_bytes());
                buf.put_slice(message.as_bytes());
                buf.put_u8(0);
                buf.freeze()
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, WireError> {
        let tag = *bytes.first().ok_or(WireError::Empty)?;
        let kind = MessageType::try_from(tag)?;
        let too_short = WireError::TooShort {
            kind,
            len: bytes.len(),
            min: kind.min_len(),
        };
        if bytes.len() < kind.min_len() {
            return Err(too_short);
        }

        let frame = match kind {
            MessageType::Start => {
                let h = StartFrame::read_from_prefix(bytes).ok_or(too_short)?;
                Frame::Start {
                    transfer_id: h.transfer_id.get(),
                    total_len: h.total_len.get(),
                    num_chunks: h.num_chunks,
                }
            }
            MessageType::Chunk => {
                let h = ChunkHeader::read_from_prefix(bytes).ok_or(too_short)?;
                Frame::Chunk {
                    transfer_id: h.transfer_id.get(),
                    index: h.index,
                    data: Bytes::copy_from_slice(&bytes[CHUNK_HEADER_LEN..]),
                }
            }
            MessageType::End => {
                let h = EndFrame::read_from_prefix(bytes).ok_or(too_short)?;
                Frame::End {
                    transfer_id: h.transfer_id.get(),
                    checksum: h.checksum.get(),
                }
            }
            MessageType::Ack => {
                let h = ControlHeader::read_from_prefix(bytes).ok_or(too_short)?;
                Frame::Ack {
                    transfer_id: h.transfer_id.get(),
                }
            }
            MessageType::Error => {
                let h = ControlHeader::read_from_prefix(bytes).ok_or(too_short)?;
                let text = &bytes[ERROR_HEADER_LEN..];
                let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                Frame::Error {
                    transfer_id: h.transfer_id.get(),
                    message: String::from_utf8_lossy(&text[..end]).into_owned(),
                }
            }
        };
        Ok(frame)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("{kind} frame too short: {len} bytes, need {min}")]
    TooShort {
        kind: MessageType,
        len: usize,
        min: usize,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_layout_is_big_endian() {
        let frame = Frame::Start {
            transfer_id: 0x0102_0304,
            total_len: 500,
            num_chunks: 3,
        };
        let bytes = frame.encode();
        assert_eq!(&bytes[..], &[0x01, 0x01, 0x02, 0x03, 0x04, 0x01, 0xF4, 0x03]);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn chunk_carries_index_and_data() {
        let bytes = [0x02, 0xDE, 0xAD, 0xBE, 0xEF, 0x07, 0xAA, 0xBB];
        match Frame::decode(&bytes).unwrap() {
            Frame::Chunk {
                transfer_id,
                index,
                data,
            } => {
                assert_eq!(transfer_id, 0xDEAD_BEEF);
                assert_eq!(index, 7);
                assert_eq!(&data[..], &[0xAA, 0xBB]);
            }
            other => panic!("expected CHUNK, got {other:?}"),
        }
    }

    #[test]
    fn end_layout() {
        let frame = Frame::End {
            transfer_id: 0xCAFE_BABE,
            checksum: 0x0001_4C08,
        };
        let bytes = frame.encode();
        assert_eq!(
            &bytes[..],
            &[0x03, 0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x01, 0x4C, 0x08]
        );
    }

    #[test]
    fn error_is_nul_terminated() {
        let frame = Frame::Error {
            transfer_id: 9,
            message: reason::CHECKSUM.to_string(),
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), ERROR_HEADER_LEN + reason::CHECKSUM.len() + 1);
        assert_eq!(bytes[bytes.len() - 1], 0);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn error_without_terminator_reads_to_end() {
        let mut bytes = vec![0x05, 0, 0, 0, 1];
        bytes.extend_from_slice(b"late");
        assert_eq!(
            Frame::decode(&bytes).unwrap(),
            Frame::Error {
                transfer_id: 1,
                message: "late".into()
            }
        );
    }

    #[test]
    fn error_stops_at_first_nul() {
        let bytes = [0x05, 0, 0, 0, 2, b'o', b'k', 0, b'x', b'y'];
        match Frame::decode(&bytes).unwrap() {
            Frame::Error { message, .. } => assert_eq!(message, "ok"),
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn short_frames_are_rejected_per_type() {
        let cases: [(&[u8], MessageType, usize); 5] = [
            (&[0x01, 0, 0, 0, 1, 0, 10], MessageType::Start, 8),
            (&[0x02, 0, 0, 0, 1, 0], MessageType::Chunk, 7),
            (&[0x03, 0, 0, 0, 1, 0, 0, 0], MessageType::End, 9),
            (&[0x04, 0, 0, 0], MessageType::Ack, 5),
            (&[0x05], MessageType::Error, 5),
        ];
        for (bytes, kind, min) in cases {
            assert_eq!(
                Frame::decode(bytes).unwrap_err(),
                WireError::TooShort {
                    kind,
                    len: bytes.len(),
                    min
                }
            );
        }
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(Frame::decode(&[]).unwrap_err(), WireError::Empty);
        assert_eq!(
            Frame::decode(&[0x09, 1, 2, 3]).unwrap_err(),
            WireError::UnknownType(0x09)
        );
        let err = MessageType::try_from(0xAB).unwrap_err();
        assert!(err.to_string().contains("0xab"));
    }

    #[test]
    fn full_chunk_fits_one_packet() {
        let frame = Frame::Chunk {
            transfer_id: 1,
            index: 11,
            data: Bytes::from(vec![0u8; CHUNK_SIZE]),
        };
        assert!(frame.encode().len() <= MAX_PACKET);
    }

    #[test]
    fn accessors() {
        let frame = Frame::Ack { transfer_id: 42 };
        assert_eq!(frame.kind(), MessageType::Ack);
        assert_eq!(frame.transfer_id(), 42);
        assert_eq!(u8::from(MessageType::Error), 0x05);
        assert_eq!(MessageType::End.to_string(), "END");
    }
}
