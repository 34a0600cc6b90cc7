//! Cache Data Protection
//!
//! Symmetric protect/unprotect transform applied to blobs on their way to and
//! from the distributed store. The bundled implementation is AES-256-GCM with
//! a random 96-bit nonce prepended to each ciphertext.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::sync::Arc;

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

// =============================================================================
// DataProtector Trait
// =============================================================================

/// Symmetric transform for blobs at rest in L2
pub trait DataProtector: Send + Sync {
    /// Encrypt a blob
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`protect`](DataProtector::protect)
    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>>;
}

/// Type alias for a shared protector
pub type DataProtectorRef = Arc<dyn DataProtector>;

// =============================================================================
// AES-256-GCM Protector
// =============================================================================

/// AES-256-GCM protector; output layout is `nonce || ciphertext+tag`
#[derive(Clone)]
pub struct AesGcmProtector {
    cipher: Aes256Gcm,
}

impl AesGcmProtector {
    /// Create a protector from a raw 256-bit key
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Create a protector from a base64-encoded 256-bit key
    pub fn from_base64(key: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(key.trim())
            .map_err(|e| Error::Configuration(format!("Invalid base64 key: {e}")))?;

        if bytes.len() != KEY_SIZE {
            return Err(Error::Configuration(format!(
                "Key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self::new(&key))
    }

    /// Generate a new random key
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    /// Generate a new random key, base64-encoded for configuration files
    pub fn generate_base64_key() -> String {
        BASE64.encode(Self::generate_key())
    }
}

impl std::fmt::Debug for AesGcmProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmProtector").finish_non_exhaustive()
    }
}

impl DataProtector for AesGcmProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Encryption(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>> {
        if protected.len() < NONCE_SIZE {
            return Err(Error::Encryption("Protected payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = protected.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Encryption(format!("Decryption failed: {e}")))
    }
}
