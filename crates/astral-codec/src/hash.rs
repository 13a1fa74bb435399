//! BLAKE3-256 hashing, used by password derivation.

/// Hash arbitrary bytes to a 32-byte BLAKE3 digest.
pub fn blake3_256(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
