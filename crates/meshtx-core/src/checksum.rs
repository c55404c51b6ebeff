//! Payload checksum — the sum of all bytes, modulo 2^32.
//!
//! Catches truncation and most single-byte corruption. It is not
//! cryptographic and does not detect reordered chunks.

/// Checksum of a complete payload.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum = Checksum::new();
    sum.update(data);
    sum.value()
}

/// Incremental form, for callers that see the payload in pieces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum(u32);

impl Checksum {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0 = data
            .iter()
            .fold(self.0, |acc, &b| acc.wrapping_add(u32::from(b)));
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}
