//! Key wrapping and digital signatures.
//!
//! Batch keys are wrapped with RSA-OAEP (SHA-256) under the
//! authority's published encryption key. Authentication requests are
//! signed with RSA PKCS#1 v1.5 over SHA-256, the scheme the
//! authority's certificate profile prescribes, and server-issued
//! confirmations are verified with the same scheme.

use std::fmt;

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::core::KsefError;
use crate::crypto::symmetric::BatchKey;

/// Modulus size used when generating credentials locally.
const KEY_BITS: usize = 2048;

/// The taxpayer's signing credential.
///
/// Wraps the RSA private key bound to the identity's certificate. The
/// key never leaves this type; callers only obtain signatures and the
/// public half.
#[derive(Clone)]
pub struct IdentityCredential {
    key: RsaPrivateKey,
}

impl IdentityCredential {
    /// Adopt an existing private key, e.g. loaded from a certificate
    /// store.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Generate a fresh 2048-bit credential.
    ///
    /// Meant for tests and local authority doubles; production
    /// credentials come from issued certificates.
    pub fn generate() -> Result<Self, KsefError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(|e| KsefError::Crypto(format!("credential generation failed: {e}")))?;
        Ok(Self { key })
    }

    /// Sign `bytes` with PKCS#1 v1.5 over SHA-256.
    pub fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, KsefError> {
        let signing_key = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key
            .try_sign(bytes)
            .map_err(|e| KsefError::Crypto(format!("signing failed: {e}")))?;
        Ok(signature.to_vec())
    }

    /// The public half, as registered with the authority.
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// The raw private key, for test doubles that play the authority.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredential")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The authority's published public keys.
#[derive(Debug, Clone)]
pub struct AuthorityKeys {
    encryption: RsaPublicKey,
    verification: RsaPublicKey,
}

impl AuthorityKeys {
    /// Build from the authority's encryption certificate and its UPO
    /// signing certificate.
    pub fn new(encryption: RsaPublicKey, verification: RsaPublicKey) -> Self {
        Self {
            encryption,
            verification,
        }
    }

    /// Key batch keys are wrapped under.
    pub fn encryption_key(&self) -> &RsaPublicKey {
        &self.encryption
    }

    /// Key server-issued confirmations are verified against.
    pub fn verification_key(&self) -> &RsaPublicKey {
        &self.verification
    }
}

/// Wrap a batch key under the authority's encryption key with
/// RSA-OAEP (SHA-256).
pub fn wrap_key(key: &BatchKey, authority_key: &RsaPublicKey) -> Result<Vec<u8>, KsefError> {
    authority_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| KsefError::Crypto(format!("key wrap failed: {e}")))
}

/// Unwrap a batch key with the matching private key.
///
/// Exists for round-trip tests and the in-memory authority double.
pub fn unwrap_key(wrapped: &[u8], private_key: &RsaPrivateKey) -> Result<BatchKey, KsefError> {
    let bytes = private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| KsefError::Crypto(format!("key unwrap failed: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KsefError::Crypto("unwrapped key has wrong length".into()))?;
    Ok(BatchKey::from_bytes(bytes))
}

/// Verify a PKCS#1 v1.5 SHA-256 signature.
///
/// Malformed signatures verify as `false` rather than erroring; the
/// caller only cares whether the document can be trusted.
pub fn verify(bytes: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    verifying_key.verify(bytes, &signature).is_ok()
}
