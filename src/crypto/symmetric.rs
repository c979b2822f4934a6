//! Authenticated symmetric encryption for batch payloads.
//!
//! AES-256-GCM with a random 96-bit nonce. The nonce is prepended to
//! the ciphertext so the whole payload travels as one opaque blob.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroize;

use crate::core::KsefError;

/// Nonce length AES-GCM is instantiated with.
const NONCE_LEN: usize = 12;

/// Symmetric key protecting exactly one batch payload.
///
/// Generated fresh per batch, never persisted, and wiped from memory
/// on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct BatchKey([u8; 32]);

impl BatchKey {
    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Adopt existing key bytes, e.g. after unwrapping.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Encrypt a batch plaintext under `key`.
///
/// Fails with [`KsefError::PayloadTooLarge`] before touching the
/// cipher if the plaintext exceeds `max_plaintext` bytes. The returned
/// blob is the nonce followed by the ciphertext and GCM tag.
pub fn encrypt_payload(
    key: &BatchKey,
    plaintext: &[u8],
    max_plaintext: usize,
) -> Result<Vec<u8>, KsefError> {
    if plaintext.len() > max_plaintext {
        return Err(KsefError::PayloadTooLarge {
            size: plaintext.len(),
            limit: max_plaintext,
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| KsefError::Crypto(format!("payload encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a nonce-prefixed blob produced by [`encrypt_payload`].
///
/// Exists for round-trip tests and the in-memory authority double;
/// the real authority performs this step server-side.
pub fn decrypt_payload(key: &BatchKey, blob: &[u8]) -> Result<Vec<u8>, KsefError> {
    if blob.len() < NONCE_LEN {
        return Err(KsefError::Crypto(format!(
            "payload blob too short: {} bytes",
            blob.len()
        )));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| KsefError::Crypto(format!("payload decryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = BatchKey::generate();
        let plaintext = b"<Faktura>roundtrip</Faktura>";

        let blob = encrypt_payload(&key, plaintext, 1024).unwrap();
        let back = decrypt_payload(&key, &blob).unwrap();
        assert_eq!(back, plaintext);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = BatchKey::generate();
        let blob = encrypt_payload(&key, b"", 1024).unwrap();
        assert_eq!(decrypt_payload(&key, &blob).unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt_payload(&BatchKey::generate(), b"secret", 1024).unwrap();
        assert!(decrypt_payload(&BatchKey::generate(), &blob).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = BatchKey::generate();
        let mut blob = encrypt_payload(&key, b"secret", 1024).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(decrypt_payload(&key, &blob).is_err());
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = BatchKey::generate();
        let a = encrypt_payload(&key, b"same input", 1024).unwrap();
        let b = encrypt_payload(&key, b"same input", 1024).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_plaintext_rejected() {
        let key = BatchKey::generate();
        let err = encrypt_payload(&key, &[0u8; 33], 32).unwrap_err();
        assert!(matches!(
            err,
            KsefError::PayloadTooLarge { size: 33, limit: 32 }
        ));
    }

    #[test]
    fn plaintext_at_limit_accepted() {
        let key = BatchKey::generate();
        assert!(encrypt_payload(&key, &[0u8; 32], 32).is_ok());
    }

    #[test]
    fn truncated_blob_rejected() {
        let key = BatchKey::generate();
        assert!(decrypt_payload(&key, &[0u8; 5]).is_err());
        assert!(decrypt_payload(&key, &[]).is_err());
    }
}
