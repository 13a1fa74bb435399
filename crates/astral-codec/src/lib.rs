//! Codec primitives for the snapshot pipeline and password derivation:
//! an LZ77-style compressor, an XChaCha20 sealed frame, and BLAKE3-256.

pub mod cipher;
pub mod hash;
pub mod lz77;

pub use cipher::{open_frame, seal_frame, xchacha20_apply, NONCE_LEN};
pub use hash::blake3_256;
pub use lz77::{compress, decompress};
