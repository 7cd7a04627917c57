//! Spinlock state snapshot
//!
//! Flat layout: the dependency mask byte followed by the speculative
//! matrix as four little-endian `u32`s. No version field.
//!
//! Author: Moroya Sakamoto

use crate::config::SNAPSHOT_WORDS;
use crate::error::{KernelError, KernelResult};

/// Encoded size in bytes
pub const SNAPSHOT_LEN: usize = 1 + 4 * SNAPSHOT_WORDS;

/// `{dependency_mask, matrix[4]}` of a two-tier spinlock; never the lock bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub dependency_mask: u8,
    pub matrix: [u32; SNAPSHOT_WORDS],
}

impl Snapshot {
    pub const fn new(dependency_mask: u8, matrix: [u32; SNAPSHOT_WORDS]) -> Self {
        Self {
            dependency_mask,
            matrix,
        }
    }

    pub fn to_bytes(&self) -> [u8; SNAPSHOT_LEN] {
        let mut out = [0u8; SNAPSHOT_LEN];
        out[0] = self.dependency_mask;
        for (chunk, word) in out[1..].chunks_exact_mut(4).zip(self.matrix.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode the first `SNAPSHOT_LEN` bytes; trailing bytes are ignored
    pub fn from_bytes(bytes: &[u8]) -> KernelResult<Self> {
        if bytes.len() < SNAPSHOT_LEN {
            return Err(KernelError::SnapshotTruncated { len: bytes.len() });
        }
        let mut matrix = [0u32; SNAPSHOT_WORDS];
        for (word, chunk) in matrix.iter_mut().zip(bytes[1..SNAPSHOT_LEN].chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self {
            dependency_mask: bytes[0],
            matrix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let snap = Snapshot::new(0xA5, [0x0403_0201, 0, u32::MAX, 7]);
        let bytes = snap.to_bytes();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 0xA5);
        assert_eq!(&bytes[1..5], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[9..13], &[0xFF; 4]);
        assert_eq!(bytes[13], 7);
    }

    #[test]
    fn test_bytes_round_trip() {
        let snap = Snapshot::new(0b1000_0001, [1, 0xDEAD_BEEF, 0x8000_0000, 42]);
        assert_eq!(Snapshot::from_bytes(&snap.to_bytes()), Ok(snap));
    }

    #[test]
    fn test_truncated() {
        let bytes = Snapshot::default().to_bytes();
        assert_eq!(
            Snapshot::from_bytes(&bytes[..16]),
            Err(KernelError::SnapshotTruncated { len: 16 })
        );
        assert_eq!(
            Snapshot::from_bytes(&[]),
            Err(KernelError::SnapshotTruncated { len: 0 })
        );
    }
}
