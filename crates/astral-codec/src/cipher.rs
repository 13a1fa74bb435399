//! XChaCha20 stream cipher and the sealed snapshot frame.
//!
//! The cipher is an involution (encrypt and decrypt are the same keystream
//! XOR), so one `apply` function covers both directions. The on-disk frame
//! is `nonce (24 bytes) || ciphertext` under a caller-supplied key; a
//! fresh random nonce is drawn for every seal.

use astral_error::{AstralError, Result};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use rand::RngCore;

/// Nonce length of the frame header.
pub const NONCE_LEN: usize = 24;

/// Apply the XChaCha20 keystream for `key`/`nonce` to `data` in place.
/// Output length equals input length; applying twice restores the input.
pub fn xchacha20_apply(key: &[u8; 32], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let mut cipher = XChaCha20::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Encrypt `plaintext` under `key` into a `nonce || ciphertext` frame.
pub fn seal_frame(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(plaintext);
    xchacha20_apply(key, &nonce, &mut out[NONCE_LEN..]);
    out
}

/// Decrypt a `nonce || ciphertext` frame under `key`.
pub fn open_frame(key: &[u8; 32], frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < NONCE_LEN {
        return Err(AstralError::DecryptFailure {
            detail: format!("frame shorter than nonce ({} bytes)", frame.len()),
        });
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&frame[..NONCE_LEN]);
    let mut plaintext = frame[NONCE_LEN..].to_vec();
    xchacha20_apply(key, &nonce, &mut plaintext);
    Ok(plaintext)
}
