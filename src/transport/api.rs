//! Wire contract with the authority.
//!
//! Every remote operation the engine consumes is a method on
//! [`AuthorityApi`], with explicit camelCase JSON structures. The
//! production implementation is [`crate::transport::HttpAuthority`];
//! tests and demos use [`crate::stub::StubAuthority`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ContentDigest, CorrelationId, KsefError, Nip};

/// One remote call attempt's failure, classified for the retry
/// executor.
///
/// Every failure is exactly one of the two: `Transient` failures are
/// worth repeating, `Terminal` ones would fail identically on every
/// attempt and propagate immediately with the authority's reason
/// preserved.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Timeout, connection failure, 5xx or rate limiting.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Malformed request, rejected credentials or business validation
    /// failure.
    #[error("terminal failure: {0}")]
    Terminal(#[source] KsefError),
}

/// Challenge request opening an authentication exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// Taxpayer the session will be bound to.
    pub context_identifier: Nip,
}

/// Challenge nonce issued by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// Opaque nonce to be signed by the client.
    pub challenge: String,
    /// Server time the challenge was issued at.
    pub timestamp: DateTime<Utc>,
}

/// Authentication request carrying the signed challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// The challenge exactly as issued.
    pub challenge: String,
    /// Signature over the canonical challenge payload, base64.
    pub signed_challenge: String,
    /// Taxpayer the session is opened for.
    pub context_identifier: Nip,
}

/// Successful authentication outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    /// Bearer token for subsequent calls.
    pub session_token: String,
    /// Authority-side identifier of the session context.
    pub context_reference: String,
    /// Instant the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Integrity metadata for one document inside a batch payload.
///
/// The payload itself is opaque to the server until decrypted; the
/// manifest carries the per-document byte lengths needed to split the
/// concatenated plaintext, plus digests for integrity references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManifestEntry {
    /// Client-assigned document id.
    pub correlation_id: CorrelationId,
    /// SHA-256 of the raw document bytes.
    pub digest: ContentDigest,
    /// Raw document length in bytes.
    pub byte_length: usize,
}

/// One encrypted batch, ready for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    /// Client-generated token making resubmission idempotent.
    pub idempotency_token: Uuid,
    /// Nonce-prefixed AES-GCM ciphertext, base64.
    pub encrypted_payload: String,
    /// Batch key wrapped under the authority's key, base64.
    pub wrapped_key: String,
    /// Signature over the encrypted payload, base64.
    pub signature: String,
    /// Per-document metadata, in payload order.
    pub manifest: Vec<BatchManifestEntry>,
}

/// Acknowledgement of an accepted batch transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    /// Server-assigned reference for status polling.
    pub batch_reference: String,
}

/// Server-side processing state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireInvoiceStatus {
    /// Still being validated.
    Pending,
    /// Passed validation; a KSeF number has been assigned.
    Accepted,
    /// Failed validation; terminal.
    Rejected,
    /// A status this client version does not know.
    #[serde(other)]
    Unknown,
}

/// Per-document entry in a status poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatusEntry {
    /// Client-assigned document id.
    pub correlation_id: CorrelationId,
    /// Processing state.
    pub status: WireInvoiceStatus,
    /// Numeric processing code, when the authority reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Rejection reason code, present iff rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Authority-assigned invoice number, present once accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksef_number: Option<String>,
}

/// Status of every document in one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    /// One entry per submitted document.
    pub entries: Vec<InvoiceStatusEntry>,
}

/// Signed confirmation document for one accepted invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpoResponse {
    /// The confirmation document, base64.
    pub document: String,
    /// Signature over the document, base64; absent when the authority
    /// has not countersigned yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// The authority's remote surface, one method per endpoint.
///
/// Implementations perform exactly one attempt per call and classify
/// failures; retrying is [`crate::transport::execute`]'s job.
#[async_trait]
pub trait AuthorityApi: Send + Sync {
    /// Request a challenge nonce for `request.context_identifier`.
    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, CallError>;

    /// Exchange a signed challenge for a session token.
    async fn authenticate(
        &self,
        request: &AuthenticateRequest,
    ) -> Result<AuthenticateResponse, CallError>;

    /// Transmit one encrypted batch under the session `token`.
    async fn submit_batch(
        &self,
        token: &str,
        request: &SubmitBatchRequest,
    ) -> Result<SubmitBatchResponse, CallError>;

    /// Fetch the processing status of every document in a batch.
    async fn poll_status(
        &self,
        token: &str,
        batch_reference: &str,
    ) -> Result<BatchStatusResponse, CallError>;

    /// Fetch the signed confirmation for one accepted invoice.
    async fn fetch_upo(
        &self,
        token: &str,
        correlation_id: CorrelationId,
    ) -> Result<UpoResponse, CallError>;

    /// Revoke the session `token` remotely.
    async fn revoke(&self, token: &str) -> Result<(), CallError>;
}
