//! OneDrive-compatible quickXorHash
//!
//! The algorithm works on a 160-bit (20-byte) hash state. Each input byte
//! is XOR-ed into the state at the current *bit* position and the position
//! advances by 11 bits (mod 160). After all input the total length (as a
//! little-endian `u64`) is XOR-ed into the last 8 bytes of the state. The
//! 20-byte result is Base64-encoded for comparison with the values the
//! Graph API reports.

use std::path::Path;

use base64::Engine;
use onedrift_core::domain::ContentHash;
use tokio::io::AsyncReadExt;

/// Read buffer for streaming file hashing (64 KiB keeps memory constant
/// regardless of file size).
const READ_BUF_SIZE: usize = 64 * 1024;

/// Incremental quickXorHash state
pub struct QuickXorHasher {
    data: [u8; 20],
    shift: usize,
    length: u64,
}

impl QuickXorHasher {
    /// Width of the hash in bits
    const WIDTH_BITS: usize = 160;

    /// Number of bits the position advances per input byte
    const SHIFT_STEP: usize = 11;

    /// Create a fresh hasher
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: [0u8; 20],
            shift: 0,
            length: 0,
        }
    }

    /// Feed input bytes
    pub fn update(&mut self, input: &[u8]) {
        for &byte in input {
            let byte_pos = self.shift / 8;
            let bit_offset = self.shift % 8;

            self.data[byte_pos % 20] ^= byte << bit_offset;
            if bit_offset > 0 {
                self.data[(byte_pos + 1) % 20] ^= byte >> (8 - bit_offset);
            }

            self.shift = (self.shift + Self::SHIFT_STEP) % Self::WIDTH_BITS;
        }
        self.length += input.len() as u64;
    }

    /// Consume the hasher and produce the Base64-encoded digest
    #[must_use]
    pub fn finalize(mut self) -> ContentHash {
        let length_bytes = self.length.to_le_bytes();
        for (i, &lb) in length_bytes.iter().enumerate() {
            self.data[20 - length_bytes.len() + i] ^= lb;
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.data);
        // A 20-byte digest always Base64-encodes to a valid ContentHash.
        ContentHash::new(encoded).expect("quickXorHash digest is always valid Base64")
    }
}

impl Default for QuickXorHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash an in-memory byte slice
#[must_use]
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = QuickXorHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Hash a file by streaming it from disk
///
/// Memory use is bounded by the read buffer, so arbitrarily large files
/// hash without being loaded whole.
pub async fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = QuickXorHasher::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
