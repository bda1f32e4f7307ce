//! Transfer identity: the random transfer ID and the whole-file content hash
//! that tie an announce to its data blocks.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::integrity::ContentHasher;
use crate::protocol::DIGEST_LEN;

/// 64-bit transfer identifier. Chosen by the sender from the OS random source.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    /// Fresh random ID. Collisions are negligible at 64 bits, so no check
    /// against other local sessions is made.
    pub fn generate() -> Self {
        TransferId(OsRng.next_u64())
    }

    pub fn from_u64(v: u64) -> Self {
        TransferId(v)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Whole-file digest carried in the announce.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut h = ContentHasher::new();
        h.update(data);
        h.finish()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_differ() {
        let a = TransferId::generate();
        let b = TransferId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn id_display_is_fixed_width_hex() {
        assert_eq!(TransferId::from_u64(42).to_string(), "000000000000002a");
    }

    #[test]
    fn empty_input_hash_is_md5_of_nothing() {
        assert_eq!(
            ContentHash::of(b"").to_string(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
