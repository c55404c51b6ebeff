//! Bounded accumulation buffer for an inbound payload.

use zeroize::Zeroize;

use crate::wire::MAX_PAYLOAD;

/// Owned buffer whose only write path enforces the capacity bound.
///
/// A rejected append writes nothing. `clear` zeroes the bytes before the
/// length is reset, so a later transfer never observes stale payload data.
#[derive(Debug)]
pub struct PayloadBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl PayloadBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PAYLOAD)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn try_extend(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let len = self.data.len();
        if len + bytes.len() > self.capacity {
            return Err(BufferError::Overflow {
                len,
                extra: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn clear(&mut self) {
        // Zeroize on a Vec wipes the full allocation, then truncates.
        self.data.zeroize();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PayloadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("appending {extra} bytes to {len} would exceed capacity {capacity}")]
    Overflow {
        len: usize,
        extra: usize,
        capacity: usize,
    },
}
