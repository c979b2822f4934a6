//! In-memory authority double for tests and local development.
//!
//! [`StubAuthority`] plays the server side of every exchange without a
//! network or access to a real environment: it issues challenges,
//! verifies signed challenges against the registered client key, opens
//! sealed envelopes with the authority private keys, assigns KSeF
//! numbers and countersigns confirmations. Knobs inject outages,
//! rejections and session loss, the paths that are hard to provoke
//! against a live environment.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use uuid::Uuid;

use crate::core::{ContentDigest, CorrelationId, KsefError, Nip};
use crate::crypto::{AuthorityKeys, IdentityCredential, decrypt_payload, unwrap_key, verify};
use crate::session::auth_payload;
use crate::transport::{
    AuthenticateRequest, AuthenticateResponse, AuthorityApi, BatchStatusResponse, CallError,
    ChallengeRequest, ChallengeResponse, InvoiceStatusEntry, SubmitBatchRequest,
    SubmitBatchResponse, UpoResponse, WireInvoiceStatus,
};

/// Call counts per endpoint, for assertions on retry and renewal
/// behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubCounters {
    pub challenges: u32,
    pub authentications: u32,
    pub submits: u32,
    pub polls: u32,
    pub upo_fetches: u32,
    pub revocations: u32,
}

struct IssuedChallenge {
    nip: Nip,
    timestamp: DateTime<Utc>,
}

struct IssuedSession {
    nip: Nip,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

struct StubInvoice {
    correlation_id: CorrelationId,
    xml: Vec<u8>,
    ksef_number: String,
    rejection: Option<String>,
}

struct StubBatch {
    reference: String,
    polls: u32,
    invoices: Vec<StubInvoice>,
}

#[derive(Default)]
struct StubState {
    challenges: HashMap<String, IssuedChallenge>,
    sessions: HashMap<String, IssuedSession>,
    batches: Vec<StubBatch>,
    by_token: HashMap<Uuid, usize>,
    by_reference: HashMap<String, usize>,
    seq: u64,
    session_ttl: Option<chrono::Duration>,
    pending_polls: u32,
    reject_marker: Option<Vec<u8>>,
    fail_challenges: u32,
    fail_submits: u32,
    fail_polls: u32,
    unsigned_upos: bool,
    tamper_upo: bool,
    counters: StubCounters,
}

impl StubState {
    fn authorize(&self, token: &str) -> Result<Nip, CallError> {
        match self.sessions.get(token) {
            Some(session) if !session.revoked && session.expires_at > Utc::now() => {
                Ok(session.nip.clone())
            }
            Some(_) => Err(CallError::Terminal(KsefError::SessionInvalid(
                "session expired or revoked".into(),
            ))),
            None => Err(CallError::Terminal(KsefError::SessionInvalid(
                "unknown session token".into(),
            ))),
        }
    }
}

/// An [`AuthorityApi`] implementation that keeps everything in memory.
///
/// The stub holds the authority's private keys, so submitted envelopes
/// are genuinely unwrapped and decrypted; what the client encrypts is
/// what [`StubAuthority::received_xml`] returns. Sessions, batches and
/// statuses live behind one lock and every call is a single synchronous
/// step, which keeps tests deterministic.
pub struct StubAuthority {
    decryption: RsaPrivateKey,
    upo_signer: IdentityCredential,
    client_key: RsaPublicKey,
    state: Mutex<StubState>,
}

impl StubAuthority {
    /// Build a stub from explicit authority keys and the client's
    /// registered public key.
    pub fn new(
        decryption: RsaPrivateKey,
        upo_signing: RsaPrivateKey,
        client_key: RsaPublicKey,
    ) -> Self {
        Self {
            decryption,
            upo_signer: IdentityCredential::new(upo_signing),
            client_key,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Build a stub with freshly generated authority keys.
    pub fn generate(client_key: RsaPublicKey) -> Result<Self, KsefError> {
        let decryption = IdentityCredential::generate()?;
        let signing = IdentityCredential::generate()?;
        Ok(Self::new(
            decryption.private_key().clone(),
            signing.private_key().clone(),
            client_key,
        ))
    }

    /// The public halves clients configure themselves with.
    pub fn authority_keys(&self) -> AuthorityKeys {
        AuthorityKeys::new(
            self.decryption.to_public_key(),
            self.upo_signer.public_key(),
        )
    }

    /// Call counts so far.
    pub fn counters(&self) -> StubCounters {
        self.lock().counters
    }

    /// Number of logical batches accepted, after idempotent dedup.
    pub fn batch_count(&self) -> usize {
        self.lock().batches.len()
    }

    /// The decrypted bytes received for one document, if any batch
    /// carried it.
    pub fn received_xml(&self, correlation_id: CorrelationId) -> Option<Vec<u8>> {
        self.lock()
            .batches
            .iter()
            .flat_map(|batch| batch.invoices.iter())
            .find(|invoice| invoice.correlation_id == correlation_id)
            .map(|invoice| invoice.xml.clone())
    }

    /// Fail the next `n` challenge requests with a transient error.
    pub fn fail_next_challenges(&self, n: u32) {
        self.lock().fail_challenges = n;
    }

    /// Fail the next `n` batch submissions with a transient error.
    pub fn fail_next_submits(&self, n: u32) {
        self.lock().fail_submits = n;
    }

    /// Fail the next `n` status polls with a transient error.
    pub fn fail_next_polls(&self, n: u32) {
        self.lock().fail_polls = n;
    }

    /// Keep documents pending for the first `n` polls of their batch.
    pub fn set_pending_polls(&self, n: u32) {
        self.lock().pending_polls = n;
    }

    /// Reject any document whose bytes contain `marker`.
    pub fn reject_containing(&self, marker: impl Into<Vec<u8>>) {
        let marker = marker.into();
        self.lock().reject_marker = (!marker.is_empty()).then_some(marker);
    }

    /// Lifetime stamped on tokens issued from now on.
    pub fn set_session_ttl(&self, ttl: Duration) {
        self.lock().session_ttl = chrono::Duration::from_std(ttl).ok();
    }

    /// Invalidate every session issued so far, as if the server had
    /// dropped them.
    pub fn expire_sessions(&self) {
        let now = Utc::now();
        for session in self.lock().sessions.values_mut() {
            session.expires_at = now;
        }
    }

    /// Leave confirmations uncountersigned.
    pub fn issue_unsigned_upos(&self, on: bool) {
        self.lock().unsigned_upos = on;
    }

    /// Corrupt confirmation signatures.
    pub fn tamper_upo_signatures(&self, on: bool) {
        self.lock().tamper_upo = on;
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unwrap, verify and decrypt a sealed envelope into its documents.
    fn open_envelope(
        &self,
        request: &SubmitBatchRequest,
    ) -> Result<Vec<(CorrelationId, Vec<u8>)>, CallError> {
        let wrapped = BASE64
            .decode(&request.wrapped_key)
            .map_err(|_| rejection("malformed-envelope", "wrapped key is not valid base64"))?;
        let ciphertext = BASE64
            .decode(&request.encrypted_payload)
            .map_err(|_| rejection("malformed-envelope", "payload is not valid base64"))?;
        let signature = BASE64
            .decode(&request.signature)
            .map_err(|_| rejection("malformed-envelope", "signature is not valid base64"))?;

        if !verify(&ciphertext, &signature, &self.client_key) {
            return Err(rejection(
                "bad-signature",
                "envelope signature does not match the registered key",
            ));
        }

        let key = unwrap_key(&wrapped, &self.decryption)
            .map_err(|e| rejection("malformed-envelope", e.to_string()))?;
        let plaintext = decrypt_payload(&key, &ciphertext)
            .map_err(|e| rejection("malformed-envelope", e.to_string()))?;

        let mut documents = Vec::with_capacity(request.manifest.len());
        let mut offset = 0usize;
        for entry in &request.manifest {
            let end = offset.checked_add(entry.byte_length).ok_or_else(|| {
                rejection("malformed-envelope", "manifest lengths overflow")
            })?;
            let Some(slice) = plaintext.get(offset..end) else {
                return Err(rejection(
                    "malformed-envelope",
                    "manifest lengths exceed the payload",
                ));
            };
            if ContentDigest::of(slice) != entry.digest {
                return Err(rejection(
                    "digest-mismatch",
                    format!("document {} does not match its digest", entry.correlation_id),
                ));
            }
            documents.push((entry.correlation_id, slice.to_vec()));
            offset = end;
        }
        if offset != plaintext.len() {
            return Err(rejection(
                "malformed-envelope",
                "payload longer than the manifest accounts for",
            ));
        }
        Ok(documents)
    }
}

fn rejection(code: &str, message: impl Into<String>) -> CallError {
    CallError::Terminal(KsefError::ValidationRejected {
        reason_code: code.into(),
        message: message.into(),
    })
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

#[async_trait]
impl AuthorityApi for StubAuthority {
    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, CallError> {
        let mut state = self.lock();
        state.counters.challenges += 1;
        if state.fail_challenges > 0 {
            state.fail_challenges -= 1;
            return Err(CallError::Transient("injected challenge outage".into()));
        }
        state.seq += 1;
        let challenge = format!("challenge-{:04}", state.seq);
        let timestamp = Utc::now();
        state.challenges.insert(
            challenge.clone(),
            IssuedChallenge {
                nip: request.context_identifier.clone(),
                timestamp,
            },
        );
        Ok(ChallengeResponse {
            challenge,
            timestamp,
        })
    }

    async fn authenticate(
        &self,
        request: &AuthenticateRequest,
    ) -> Result<AuthenticateResponse, CallError> {
        let mut state = self.lock();
        state.counters.authentications += 1;

        let Some(issued) = state.challenges.remove(&request.challenge) else {
            return Err(CallError::Terminal(KsefError::Protocol(
                "unknown or already used challenge".into(),
            )));
        };
        if issued.nip != request.context_identifier {
            return Err(CallError::Terminal(KsefError::Protocol(
                "challenge was issued for a different context".into(),
            )));
        }
        let payload = auth_payload(&request.challenge, &issued.nip, issued.timestamp);
        let Ok(signature) = BASE64.decode(&request.signed_challenge) else {
            return Err(CallError::Terminal(KsefError::SessionInvalid(
                "signed challenge is not valid base64".into(),
            )));
        };
        if !verify(payload.as_bytes(), &signature, &self.client_key) {
            return Err(CallError::Terminal(KsefError::SessionInvalid(
                "challenge signature rejected".into(),
            )));
        }

        state.seq += 1;
        let session_token = format!("stub-session-{:04}", state.seq);
        let context_reference = format!("ctx-{:04}", state.seq);
        let ttl = state
            .session_ttl
            .unwrap_or_else(|| chrono::Duration::hours(1));
        let expires_at = Utc::now() + ttl;
        state.sessions.insert(
            session_token.clone(),
            IssuedSession {
                nip: issued.nip,
                expires_at,
                revoked: false,
            },
        );
        Ok(AuthenticateResponse {
            session_token,
            context_reference,
            expires_at,
        })
    }

    async fn submit_batch(
        &self,
        token: &str,
        request: &SubmitBatchRequest,
    ) -> Result<SubmitBatchResponse, CallError> {
        let mut state = self.lock();
        state.counters.submits += 1;
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(CallError::Transient("injected submit outage".into()));
        }
        let nip = state.authorize(token)?;

        // Resubmission under a known idempotency token is the same
        // logical batch.
        if let Some(&index) = state.by_token.get(&request.idempotency_token) {
            return Ok(SubmitBatchResponse {
                batch_reference: state.batches[index].reference.clone(),
            });
        }

        let documents = self.open_envelope(request)?;

        state.seq += 1;
        let reference = format!("ref-{:06}", state.seq);
        let marker = state.reject_marker.clone();
        let mut invoices = Vec::with_capacity(documents.len());
        for (correlation_id, xml) in documents {
            state.seq += 1;
            let ksef_number = format!("KSEF:2025:PL/{nip}/{:06}", state.seq);
            let rejection = marker
                .as_deref()
                .filter(|m| contains_bytes(&xml, m))
                .map(|_| "content-rejected".to_string());
            invoices.push(StubInvoice {
                correlation_id,
                xml,
                ksef_number,
                rejection,
            });
        }

        let index = state.batches.len();
        state.batches.push(StubBatch {
            reference: reference.clone(),
            polls: 0,
            invoices,
        });
        state.by_token.insert(request.idempotency_token, index);
        state.by_reference.insert(reference.clone(), index);
        Ok(SubmitBatchResponse {
            batch_reference: reference,
        })
    }

    async fn poll_status(
        &self,
        token: &str,
        batch_reference: &str,
    ) -> Result<BatchStatusResponse, CallError> {
        let mut state = self.lock();
        state.counters.polls += 1;
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(CallError::Transient("injected poll outage".into()));
        }
        state.authorize(token)?;

        let Some(&index) = state.by_reference.get(batch_reference) else {
            return Err(CallError::Terminal(KsefError::Protocol(format!(
                "unknown batch reference '{batch_reference}'"
            ))));
        };
        let pending_polls = state.pending_polls;
        let batch = &mut state.batches[index];
        batch.polls += 1;
        let decided = batch.polls > pending_polls;

        let entries = batch
            .invoices
            .iter()
            .map(|invoice| {
                if !decided {
                    return InvoiceStatusEntry {
                        correlation_id: invoice.correlation_id,
                        status: WireInvoiceStatus::Pending,
                        status_code: Some(100),
                        reason_code: None,
                        ksef_number: None,
                    };
                }
                match &invoice.rejection {
                    Some(reason) => InvoiceStatusEntry {
                        correlation_id: invoice.correlation_id,
                        status: WireInvoiceStatus::Rejected,
                        status_code: Some(400),
                        reason_code: Some(reason.clone()),
                        ksef_number: None,
                    },
                    None => InvoiceStatusEntry {
                        correlation_id: invoice.correlation_id,
                        status: WireInvoiceStatus::Accepted,
                        status_code: Some(200),
                        reason_code: None,
                        ksef_number: Some(invoice.ksef_number.clone()),
                    },
                }
            })
            .collect();
        Ok(BatchStatusResponse { entries })
    }

    async fn fetch_upo(
        &self,
        token: &str,
        correlation_id: CorrelationId,
    ) -> Result<UpoResponse, CallError> {
        let mut state = self.lock();
        state.counters.upo_fetches += 1;
        state.authorize(token)?;

        let mut found = None;
        for batch in &state.batches {
            if let Some(invoice) = batch
                .invoices
                .iter()
                .find(|invoice| invoice.correlation_id == correlation_id)
            {
                found = Some((batch.polls > state.pending_polls, invoice));
                break;
            }
        }
        let Some((decided, invoice)) = found else {
            return Err(CallError::Terminal(KsefError::Protocol(format!(
                "no document {correlation_id}"
            ))));
        };
        if !decided {
            return Err(CallError::Terminal(KsefError::NotYetAvailable(
                "document is still pending".into(),
            )));
        }
        if let Some(reason) = &invoice.rejection {
            return Err(CallError::Terminal(KsefError::NotYetAvailable(format!(
                "document was rejected ({reason})"
            ))));
        }

        let document = format!(
            "<confirmation><ksefNumber>{}</ksefNumber><correlationId>{}</correlationId><issuedAt>{}</issuedAt></confirmation>",
            invoice.ksef_number,
            correlation_id,
            Utc::now().to_rfc3339(),
        )
        .into_bytes();
        let signature = if state.unsigned_upos {
            None
        } else {
            let mut signature = self
                .upo_signer
                .sign(&document)
                .map_err(CallError::Terminal)?;
            if state.tamper_upo {
                if let Some(byte) = signature.first_mut() {
                    *byte ^= 0x01;
                }
            }
            Some(BASE64.encode(signature))
        };
        Ok(UpoResponse {
            document: BASE64.encode(document),
            signature,
        })
    }

    async fn revoke(&self, token: &str) -> Result<(), CallError> {
        let mut state = self.lock();
        state.counters.revocations += 1;
        match state.sessions.get_mut(token) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                Ok(())
            }
            Some(_) => Err(CallError::Terminal(KsefError::SessionInvalid(
                "session already revoked".into(),
            ))),
            None => Err(CallError::Terminal(KsefError::SessionInvalid(
                "unknown session token".into(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InvoiceDocument;
    use crate::submit::envelope::seal_batch;
    use std::sync::OnceLock;

    static CLIENT: OnceLock<IdentityCredential> = OnceLock::new();
    static DECRYPTION: OnceLock<IdentityCredential> = OnceLock::new();
    static SIGNING: OnceLock<IdentityCredential> = OnceLock::new();

    fn client_credential() -> &'static IdentityCredential {
        CLIENT.get_or_init(|| IdentityCredential::generate().unwrap())
    }

    fn stub() -> StubAuthority {
        let decryption = DECRYPTION.get_or_init(|| IdentityCredential::generate().unwrap());
        let signing = SIGNING.get_or_init(|| IdentityCredential::generate().unwrap());
        StubAuthority::new(
            decryption.private_key().clone(),
            signing.private_key().clone(),
            client_credential().public_key(),
        )
    }

    fn nip() -> Nip {
        Nip::parse("5260250274").unwrap()
    }

    async fn open_session(stub: &StubAuthority) -> String {
        let challenge = stub
            .request_challenge(&ChallengeRequest {
                context_identifier: nip(),
            })
            .await
            .unwrap();
        let payload = auth_payload(&challenge.challenge, &nip(), challenge.timestamp);
        let signature = client_credential().sign(payload.as_bytes()).unwrap();
        let response = stub
            .authenticate(&AuthenticateRequest {
                challenge: challenge.challenge,
                signed_challenge: BASE64.encode(signature),
                context_identifier: nip(),
            })
            .await
            .unwrap();
        response.session_token
    }

    fn sealed(stub: &StubAuthority, documents: &[InvoiceDocument]) -> SubmitBatchRequest {
        seal_batch(
            documents,
            &stub.authority_keys(),
            client_credential(),
            64 * 1024,
        )
        .unwrap()
    }

    // --- authentication ---

    #[tokio::test]
    async fn signed_challenge_opens_a_session() {
        let stub = stub();
        let token = open_session(&stub).await;
        assert!(token.starts_with("stub-session-"));
        let counters = stub.counters();
        assert_eq!(counters.challenges, 1);
        assert_eq!(counters.authentications, 1);
    }

    #[tokio::test]
    async fn wrong_signer_is_rejected() {
        let stub = stub();
        let challenge = stub
            .request_challenge(&ChallengeRequest {
                context_identifier: nip(),
            })
            .await
            .unwrap();
        let payload = auth_payload(&challenge.challenge, &nip(), challenge.timestamp);
        let other = SIGNING.get_or_init(|| IdentityCredential::generate().unwrap());
        let signature = other.sign(payload.as_bytes()).unwrap();
        let err = stub
            .authenticate(&AuthenticateRequest {
                challenge: challenge.challenge,
                signed_challenge: BASE64.encode(signature),
                context_identifier: nip(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::SessionInvalid(_))
        ));
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let stub = stub();
        let challenge = stub
            .request_challenge(&ChallengeRequest {
                context_identifier: nip(),
            })
            .await
            .unwrap();
        let payload = auth_payload(&challenge.challenge, &nip(), challenge.timestamp);
        let signature = BASE64.encode(client_credential().sign(payload.as_bytes()).unwrap());
        let request = AuthenticateRequest {
            challenge: challenge.challenge,
            signed_challenge: signature,
            context_identifier: nip(),
        };
        stub.authenticate(&request).await.unwrap();
        let err = stub.authenticate(&request).await.unwrap_err();
        assert!(matches!(err, CallError::Terminal(KsefError::Protocol(_))));
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let stub = stub();
        let token = open_session(&stub).await;
        stub.expire_sessions();
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let err = stub.submit_batch(&token, &request).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::SessionInvalid(_))
        ));
    }

    // --- submission ---

    #[tokio::test]
    async fn unknown_token_cannot_submit() {
        let stub = stub();
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let err = stub.submit_batch("invalid.token", &request).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::SessionInvalid(_))
        ));
    }

    #[tokio::test]
    async fn envelope_decrypts_to_submitted_xml() {
        let stub = stub();
        let token = open_session(&stub).await;
        let doc = InvoiceDocument::new(&b"<faktura>tresc</faktura>"[..]);
        let id = doc.correlation_id();
        let request = sealed(&stub, &[doc]);
        stub.submit_batch(&token, &request).await.unwrap();
        assert_eq!(
            stub.received_xml(id).as_deref(),
            Some(&b"<faktura>tresc</faktura>"[..])
        );
    }

    #[tokio::test]
    async fn accepted_document_gets_a_ksef_number() {
        let stub = stub();
        let token = open_session(&stub).await;
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let reference = stub
            .submit_batch(&token, &request)
            .await
            .unwrap()
            .batch_reference;
        let status = stub.poll_status(&token, &reference).await.unwrap();
        assert_eq!(status.entries.len(), 1);
        assert_eq!(status.entries[0].status, WireInvoiceStatus::Accepted);
        let number = status.entries[0].ksef_number.as_deref().unwrap();
        assert!(number.starts_with("KSEF:2025:PL/5260250274/"));
    }

    #[tokio::test]
    async fn resubmission_is_one_logical_batch() {
        let stub = stub();
        let token = open_session(&stub).await;
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let first = stub.submit_batch(&token, &request).await.unwrap();
        let second = stub.submit_batch(&token, &request).await.unwrap();
        assert_eq!(first.batch_reference, second.batch_reference);
        assert_eq!(stub.batch_count(), 1);
        assert_eq!(stub.counters().submits, 2);
    }

    #[tokio::test]
    async fn injected_submit_outage_is_transient() {
        let stub = stub();
        let token = open_session(&stub).await;
        stub.fail_next_submits(1);
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let err = stub.submit_batch(&token, &request).await.unwrap_err();
        assert!(matches!(err, CallError::Transient(_)));
        stub.submit_batch(&token, &request).await.unwrap();
    }

    // --- status ---

    #[tokio::test]
    async fn documents_stay_pending_for_configured_polls() {
        let stub = stub();
        stub.set_pending_polls(2);
        let token = open_session(&stub).await;
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let reference = stub
            .submit_batch(&token, &request)
            .await
            .unwrap()
            .batch_reference;
        for _ in 0..2 {
            let status = stub.poll_status(&token, &reference).await.unwrap();
            assert_eq!(status.entries[0].status, WireInvoiceStatus::Pending);
        }
        let status = stub.poll_status(&token, &reference).await.unwrap();
        assert_eq!(status.entries[0].status, WireInvoiceStatus::Accepted);
    }

    #[tokio::test]
    async fn marked_documents_are_rejected() {
        let stub = stub();
        stub.reject_containing("REJECT-ME");
        let token = open_session(&stub).await;
        let bad = InvoiceDocument::new(&b"<f>REJECT-ME</f>"[..]);
        let good = InvoiceDocument::new(&b"<f>ok</f>"[..]);
        let request = sealed(&stub, &[bad, good]);
        let reference = stub
            .submit_batch(&token, &request)
            .await
            .unwrap()
            .batch_reference;
        let status = stub.poll_status(&token, &reference).await.unwrap();
        assert_eq!(status.entries[0].status, WireInvoiceStatus::Rejected);
        assert_eq!(
            status.entries[0].reason_code.as_deref(),
            Some("content-rejected")
        );
        assert_eq!(status.entries[1].status, WireInvoiceStatus::Accepted);
    }

    #[tokio::test]
    async fn unknown_reference_is_terminal() {
        let stub = stub();
        let token = open_session(&stub).await;
        let err = stub.poll_status(&token, "ref-999999").await.unwrap_err();
        assert!(matches!(err, CallError::Terminal(KsefError::Protocol(_))));
    }

    // --- confirmations ---

    #[tokio::test]
    async fn confirmation_signature_verifies() {
        let stub = stub();
        let token = open_session(&stub).await;
        let doc = InvoiceDocument::new(&b"<f/>"[..]);
        let id = doc.correlation_id();
        let request = sealed(&stub, &[doc]);
        let reference = stub
            .submit_batch(&token, &request)
            .await
            .unwrap()
            .batch_reference;
        stub.poll_status(&token, &reference).await.unwrap();

        let upo = stub.fetch_upo(&token, id).await.unwrap();
        let document = BASE64.decode(upo.document).unwrap();
        let signature = BASE64.decode(upo.signature.unwrap()).unwrap();
        assert!(verify(
            &document,
            &signature,
            stub.authority_keys().verification_key()
        ));
    }

    #[tokio::test]
    async fn tampered_confirmation_fails_verification() {
        let stub = stub();
        stub.tamper_upo_signatures(true);
        let token = open_session(&stub).await;
        let doc = InvoiceDocument::new(&b"<f/>"[..]);
        let id = doc.correlation_id();
        let request = sealed(&stub, &[doc]);
        let reference = stub
            .submit_batch(&token, &request)
            .await
            .unwrap()
            .batch_reference;
        stub.poll_status(&token, &reference).await.unwrap();

        let upo = stub.fetch_upo(&token, id).await.unwrap();
        let document = BASE64.decode(upo.document).unwrap();
        let signature = BASE64.decode(upo.signature.unwrap()).unwrap();
        assert!(!verify(
            &document,
            &signature,
            stub.authority_keys().verification_key()
        ));
    }

    #[tokio::test]
    async fn pending_document_has_no_confirmation() {
        let stub = stub();
        stub.set_pending_polls(5);
        let token = open_session(&stub).await;
        let doc = InvoiceDocument::new(&b"<f/>"[..]);
        let id = doc.correlation_id();
        let request = sealed(&stub, &[doc]);
        stub.submit_batch(&token, &request).await.unwrap();
        let err = stub.fetch_upo(&token, id).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::NotYetAvailable(_))
        ));
    }

    // --- revocation ---

    #[tokio::test]
    async fn revoked_token_stops_working() {
        let stub = stub();
        let token = open_session(&stub).await;
        stub.revoke(&token).await.unwrap();
        let request = sealed(&stub, &[InvoiceDocument::new(&b"<f/>"[..])]);
        let err = stub.submit_batch(&token, &request).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::SessionInvalid(_))
        ));
        let err = stub.revoke(&token).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::SessionInvalid(_))
        ));
    }
}
