//! Integrity: per-block digest, verify on receive, streaming whole-file digest.

use md5::{Digest, Md5};

use crate::identity::ContentHash;
use crate::protocol::DIGEST_LEN;

/// Hash a block payload. Returns 16-byte digest.
pub fn hash_block(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Md5::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Verify block payload against expected hash.
pub fn verify_block(payload: &[u8], expected_hash: &[u8; DIGEST_LEN]) -> bool {
    hash_block(payload) == *expected_hash
}

/// Incremental content digest, fed block by block.
pub struct ContentHasher {
    inner: Md5,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { inner: Md5::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> ContentHash {
        ContentHash::from_bytes(self.inner.finalize().into())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
