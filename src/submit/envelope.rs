//! Building the encrypted submission envelope for one batch.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use crate::core::{InvoiceDocument, KsefError};
use crate::crypto::{AuthorityKeys, BatchKey, IdentityCredential, encrypt_payload, wrap_key};
use crate::transport::{BatchManifestEntry, SubmitBatchRequest};

/// Seal `documents` into a transmissible batch request.
///
/// The plaintext is the documents' raw bytes concatenated in order;
/// the manifest carries per-document byte lengths so the authority can
/// split it after decryption, which keeps the plaintext size equal to
/// the planned batch size. A fresh symmetric key encrypts the payload
/// and is dropped as soon as it has been wrapped; only the wrapped
/// form leaves this function. The signature covers the raw ciphertext
/// bytes.
pub(crate) fn seal_batch(
    documents: &[InvoiceDocument],
    authority_keys: &AuthorityKeys,
    credential: &IdentityCredential,
    max_plaintext: usize,
) -> Result<SubmitBatchRequest, KsefError> {
    let total: usize = documents.iter().map(InvoiceDocument::byte_len).sum();
    let mut plaintext = Vec::with_capacity(total);
    let mut manifest = Vec::with_capacity(documents.len());
    for doc in documents {
        plaintext.extend_from_slice(doc.xml());
        manifest.push(BatchManifestEntry {
            correlation_id: doc.correlation_id(),
            digest: *doc.digest(),
            byte_length: doc.byte_len(),
        });
    }

    let key = BatchKey::generate();
    let ciphertext = encrypt_payload(&key, &plaintext, max_plaintext)?;
    let wrapped_key = wrap_key(&key, authority_keys.encryption_key())?;
    // The key's job ends here; it is wiped on drop.
    drop(key);

    let signature = credential.sign(&ciphertext)?;

    Ok(SubmitBatchRequest {
        idempotency_token: Uuid::new_v4(),
        encrypted_payload: BASE64.encode(&ciphertext),
        wrapped_key: BASE64.encode(wrapped_key),
        signature: BASE64.encode(signature),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::RsaPrivateKey;
    use crate::crypto::{decrypt_payload, unwrap_key, verify};
    use std::sync::OnceLock;

    static AUTHORITY: OnceLock<RsaPrivateKey> = OnceLock::new();
    static CREDENTIAL: OnceLock<IdentityCredential> = OnceLock::new();

    fn authority_private() -> &'static RsaPrivateKey {
        AUTHORITY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
    }

    fn authority_keys() -> AuthorityKeys {
        let public = authority_private().to_public_key();
        AuthorityKeys::new(public.clone(), public)
    }

    fn credential() -> &'static IdentityCredential {
        CREDENTIAL.get_or_init(|| IdentityCredential::generate().unwrap())
    }

    fn docs() -> Vec<InvoiceDocument> {
        vec![
            InvoiceDocument::new(&b"<Faktura nr='1'/>"[..]),
            InvoiceDocument::new(&b"<Faktura nr='2' extra='x'/>"[..]),
        ]
    }

    #[test]
    fn manifest_mirrors_documents_in_order() {
        let docs = docs();
        let request = seal_batch(&docs, &authority_keys(), credential(), 1 << 20).unwrap();
        assert_eq!(request.manifest.len(), 2);
        for (entry, doc) in request.manifest.iter().zip(&docs) {
            assert_eq!(entry.correlation_id, doc.correlation_id());
            assert_eq!(entry.byte_length, doc.byte_len());
            assert_eq!(&entry.digest, doc.digest());
        }
    }

    #[test]
    fn authority_side_recovers_concatenated_plaintext() {
        let docs = docs();
        let request = seal_batch(&docs, &authority_keys(), credential(), 1 << 20).unwrap();

        let wrapped = BASE64.decode(&request.wrapped_key).unwrap();
        let key = unwrap_key(&wrapped, authority_private()).unwrap();
        let ciphertext = BASE64.decode(&request.encrypted_payload).unwrap();
        let plaintext = decrypt_payload(&key, &ciphertext).unwrap();

        let mut expected = Vec::new();
        for doc in &docs {
            expected.extend_from_slice(doc.xml());
        }
        assert_eq!(plaintext, expected);

        // The manifest byte lengths partition the plaintext exactly.
        let total: usize = request.manifest.iter().map(|e| e.byte_length).sum();
        assert_eq!(total, plaintext.len());
    }

    #[test]
    fn signature_covers_ciphertext() {
        let request = seal_batch(&docs(), &authority_keys(), credential(), 1 << 20).unwrap();
        let ciphertext = BASE64.decode(&request.encrypted_payload).unwrap();
        let signature = BASE64.decode(&request.signature).unwrap();
        assert!(verify(&ciphertext, &signature, &credential().public_key()));
    }

    #[test]
    fn fresh_idempotency_token_per_seal() {
        let docs = docs();
        let a = seal_batch(&docs, &authority_keys(), credential(), 1 << 20).unwrap();
        let b = seal_batch(&docs, &authority_keys(), credential(), 1 << 20).unwrap();
        assert_ne!(a.idempotency_token, b.idempotency_token);
    }

    #[test]
    fn oversized_plaintext_propagates() {
        let err = seal_batch(&docs(), &authority_keys(), credential(), 4).unwrap_err();
        assert!(matches!(err, KsefError::PayloadTooLarge { .. }));
    }
}
