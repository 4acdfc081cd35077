//! Content hashing for deterministic merge verification.
//!
//! Produces a SHA-256 hash of channel data, so two merges of the same film
//! can be compared bit for bit across runs and devices.

use bytemuck::Pod;
use sha2::{Digest, Sha256};

use crate::channel::Channel;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the content hash of a single channel.
pub fn hash_channel<T: Pod>(channel: &Channel<T>) -> ContentHash {
    let mut hasher = Sha256::new();
    // Dimensions and kind are part of the hash so equal bytes in differently
    // shaped channels do not collide.
    hasher.update(channel.width().to_le_bytes());
    hasher.update(channel.height().to_le_bytes());
    hasher.update(channel.kind().label().as_bytes());
    hasher.update(channel.as_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    ContentHash::from_bytes(bytes)
}
