//! User records and salted password verification.
//!
//! Verifier derivation chains two BLAKE3 hashes and a fixed-parameter
//! XChaCha20 pass:
//!
//! 1. `h1 = BLAKE3(password)`
//! 2. `h2 = BLAKE3(h1 || device_salt || instance_salt || session_salt)`
//! 3. the stored verifier is `h2` encrypted under a key derived by XORing
//!    the device and instance salts and a nonce derived from the session
//!    salt XOR `0xC3`.
//!
//! Verification repeats the derivation and compares ciphertexts.

use astral_codec::{blake3_256, xchacha20_apply, NONCE_LEN};
use astral_types::Permissions;
use rand::RngCore;

/// Per-`(table, row, column)` permission entry carried by a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FineGrainedGrant {
    pub table: String,
    pub row_id: usize,
    pub column: String,
    pub perms: Permissions,
}

/// A registered user: name, encrypted password verifier, and optional
/// fine-grained permission entries.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub encrypted_password: Vec<u8>,
    pub fine_grained: Vec<FineGrainedGrant>,
}

/// The three salts feeding verifier derivation.
///
/// Device and instance salts default to fixed fills; the session salt is
/// random per engine instance and can be regenerated, which invalidates
/// every verifier derived under the previous value.
#[derive(Debug, Clone)]
pub struct SaltState {
    device: Vec<u8>,
    instance: Vec<u8>,
    session: Vec<u8>,
}

impl Default for SaltState {
    fn default() -> Self {
        Self::new()
    }
}

impl SaltState {
    /// Default salts: 32×`0xA1` device, 32×`0xB2` instance, random session.
    pub fn new() -> Self {
        let mut session = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut session);
        Self {
            device: vec![0xA1; 32],
            instance: vec![0xB2; 32],
            session,
        }
    }

    /// Replace the device salt.
    pub fn set_device_salt(&mut self, salt: Vec<u8>) {
        self.device = salt;
    }

    /// Replace the instance salt.
    pub fn set_instance_salt(&mut self, salt: Vec<u8>) {
        self.instance = salt;
    }

    /// Replace the session salt. Invalidates stored verifiers.
    pub fn set_session_salt(&mut self, salt: Vec<u8>) {
        self.session = salt;
    }

    /// Draw a fresh random session salt. Invalidates stored verifiers.
    pub fn regenerate_session_salt(&mut self) {
        rand::thread_rng().fill_bytes(&mut self.session);
    }

    fn combined(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(self.device.len() + self.instance.len() + self.session.len());
        out.extend_from_slice(&self.device);
        out.extend_from_slice(&self.instance);
        out.extend_from_slice(&self.session);
        out
    }

    /// The XChaCha20 key derived by XORing the device and instance salts.
    ///
    /// Keys both the password-verifier encryption and the snapshot frame.
    /// The session salt is deliberately excluded so the key is stable
    /// across engine restarts; changing the device or instance salt
    /// orphans snapshots written under the previous pair.
    pub fn storage_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = self.device[i % self.device.len()] ^ self.instance[i % self.instance.len()];
        }
        key
    }

    fn cipher_nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        for (i, byte) in nonce.iter_mut().enumerate() {
            *byte = self.session[i % self.session.len()] ^ 0xC3;
        }
        nonce
    }

    /// Derive the stored verifier for a password under the current salts.
    pub fn derive_verifier(&self, password: &str) -> Vec<u8> {
        let h1 = blake3_256(password.as_bytes());
        let mut salted = h1.to_vec();
        salted.extend_from_slice(&self.combined());
        let h2 = blake3_256(&salted);
        let mut verifier = h2.to_vec();
        xchacha20_apply(&self.storage_key(), &self.cipher_nonce(), &mut verifier);
        verifier
    }
}

impl User {
    /// Create a user whose verifier is derived under the given salts.
    pub fn new(name: impl Into<String>, password: &str, salts: &SaltState) -> Self {
        Self {
            name: name.into(),
            encrypted_password: salts.derive_verifier(password),
            fine_grained: Vec::new(),
        }
    }

    /// Whether `candidate` derives the stored verifier under the given
    /// salts.
    pub fn verify_password(&self, candidate: &str, salts: &SaltState) -> bool {
        salts.derive_verifier(candidate) == self.encrypted_password
    }
}
