use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use super::error::KsefError;

/// Client-assigned correlation identifier for one invoice document.
///
/// Generated once at document construction and stable across batch
/// splitting, resubmission, and status polling. The authority echoes it
/// back in status and confirmation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// SHA-256 content digest, hex-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Digest the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string, either case.
    pub fn from_hex(hex: &str) -> Result<Self, KsefError> {
        if hex.len() != 64 {
            return Err(KsefError::Protocol(format!(
                "digest must be 64 hex characters, got {}",
                hex.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = hex_value(chunk[0])?;
            let lo = hex_value(chunk[1])?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_value(c: u8) -> Result<u8, KsefError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(KsefError::Protocol(format!(
            "invalid hex character '{}'",
            c as char
        ))),
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A single invoice document handed to the engine.
///
/// The engine treats the XML as opaque bytes — schema validation happens
/// upstream. Immutable once constructed; owned by the batch that carries it
/// until the submission reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDocument {
    correlation_id: CorrelationId,
    xml: Vec<u8>,
    digest: ContentDigest,
}

impl InvoiceDocument {
    /// Construct a document from raw invoice XML, assigning a fresh
    /// correlation id and computing the content digest.
    pub fn new(xml: impl Into<Vec<u8>>) -> Self {
        let xml = xml.into();
        let digest = ContentDigest::of(&xml);
        Self {
            correlation_id: CorrelationId::generate(),
            xml,
            digest,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn xml(&self) -> &[u8] {
        &self.xml
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Payload size in bytes, the unit the batch limits are expressed in.
    pub fn byte_len(&self) -> usize {
        self.xml.len()
    }
}

/// Per-invoice processing state.
///
/// ```text
/// Queued → Uploading → AwaitingProcessing → Accepted
///    ↑         │                          ↘ Rejected
///    └─────────┘  (rollback on transient batch failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    /// Waiting for inclusion in an outbound batch, or rolled back after a
    /// failed batch transmission.
    Queued,
    /// Included in a batch whose transmission is in flight.
    Uploading,
    /// The batch was accepted by the server; awaiting the validation
    /// outcome for this invoice.
    AwaitingProcessing,
    /// Passed server-side validation. Terminal.
    Accepted,
    /// Failed server-side validation. Terminal — never retried
    /// automatically; the record keeps the rejection reason code.
    Rejected,
}

impl DocumentState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

/// Per-invoice outcome tracker. One record per [`InvoiceDocument`]; lives
/// until the caller purges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Client-assigned correlation id of the tracked document.
    pub correlation_id: CorrelationId,
    /// Current state in the processing state machine.
    pub state: DocumentState,
    /// Authority-assigned invoice reference (KSeF number), set once the
    /// invoice is accepted. Format `KSEF:2025:PL/{nip}/{suffix}`.
    pub authority_reference: Option<String>,
    /// Last HTTP/application status code observed for the owning batch.
    pub last_status_code: Option<u16>,
    /// Rejection reason code, kept verbatim from the authority.
    pub reason_code: Option<String>,
    /// Transmission attempts made for the owning batch, including the
    /// first. Retries = `attempts - 1`.
    pub attempts: u32,
    /// When the first transmission attempt started.
    pub first_attempt_at: Option<DateTime<Utc>>,
    /// When the most recent attempt started.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Detail of the last transmission failure, if the batch never got
    /// accepted by the server.
    pub last_error: Option<String>,
}

impl SubmissionRecord {
    /// Fresh record in the `Queued` state.
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            state: DocumentState::Queued,
            authority_reference: None,
            last_status_code: None,
            reason_code: None,
            attempts: 0,
            first_attempt_at: None,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Transmission retries performed beyond the initial attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// The owning batch entered transmission.
    pub(crate) fn mark_uploading(&mut self, now: DateTime<Utc>) {
        self.state = DocumentState::Uploading;
        if self.first_attempt_at.is_none() {
            self.first_attempt_at = Some(now);
        }
        self.last_attempt_at = Some(now);
    }

    /// Account for `n` wire attempts, the last of which started at
    /// `last_started`.
    pub(crate) fn record_attempts(&mut self, n: u32, last_started: DateTime<Utc>) {
        self.attempts += n;
        self.last_attempt_at = Some(last_started);
    }

    /// Transient batch failure: back to the queue, keeping the error.
    pub(crate) fn roll_back(&mut self, error: impl Into<String>) {
        self.state = DocumentState::Queued;
        self.last_error = Some(error.into());
    }

    /// The owning batch was accepted by the server.
    pub(crate) fn mark_awaiting(&mut self, status_code: Option<u16>) {
        self.state = DocumentState::AwaitingProcessing;
        self.last_status_code = status_code;
        self.last_error = None;
    }

    /// Server-side validation passed.
    pub(crate) fn mark_accepted(&mut self, reference: Option<String>, status_code: Option<u16>) {
        self.state = DocumentState::Accepted;
        self.authority_reference = reference;
        if status_code.is_some() {
            self.last_status_code = status_code;
        }
        self.reason_code = None;
    }

    /// Server-side validation failed. Terminal.
    pub(crate) fn mark_rejected(&mut self, reason_code: Option<String>, status_code: Option<u16>) {
        self.state = DocumentState::Rejected;
        self.reason_code = reason_code;
        if status_code.is_some() {
            self.last_status_code = status_code;
        }
    }
}

/// Reporting classification for a record at the moment a caller collects
/// results. `TimedOut` is not a data-model state: it means "the invoice is
/// still being processed — poll again later", never rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The invoice passed server-side validation.
    Accepted,
    /// The invoice was rejected; the record carries the reason code.
    Rejected,
    /// The polling window closed before a terminal outcome arrived.
    TimedOut,
}

impl Resolution {
    /// Classify a record's state for reporting.
    pub fn of(state: DocumentState) -> Self {
        match state {
            DocumentState::Accepted => Self::Accepted,
            DocumentState::Rejected => Self::Rejected,
            DocumentState::Queued | DocumentState::Uploading | DocumentState::AwaitingProcessing => {
                Self::TimedOut
            }
        }
    }
}

/// One entry of a completion report: the record snapshot plus its
/// reporting classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub record: SubmissionRecord,
    pub resolution: Resolution,
}

/// Opaque handle identifying the batches created by one `submit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(Uuid);

impl BatchHandle {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Verification outcome attached to a fetched confirmation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// The signature verified against the authority's public key.
    Valid,
    /// A signature was present but did not verify.
    Invalid,
    /// The response carried no signature to check.
    Unverifiable,
}

/// The authority's signed confirmation document (UPO) for one accepted
/// invoice, together with the verification result. Immutable.
///
/// A failed verification does not discard the document — the artifact is
/// returned flagged so the caller decides how to treat it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpoArtifact {
    /// The invoice this confirmation attests to.
    pub correlation_id: CorrelationId,
    /// The signed confirmation document exactly as received.
    pub document: Vec<u8>,
    /// Outcome of signature verification against the authority's key.
    pub verification: VerificationStatus,
}

impl UpoArtifact {
    /// Enforce a cryptographically trusted confirmation.
    ///
    /// Returns the artifact unchanged when verification succeeded, or
    /// [`KsefError::VerificationFailed`] otherwise — for audit-grade
    /// callers that must not accept an untrusted UPO.
    pub fn require_valid(self) -> Result<Self, KsefError> {
        match self.verification {
            VerificationStatus::Valid => Ok(self),
            VerificationStatus::Invalid | VerificationStatus::Unverifiable => Err(
                KsefError::VerificationFailed(self.correlation_id.to_string()),
            ),
        }
    }
}

/// An authenticated session credential issued by the authority.
///
/// Owned by the session manager; other components receive a per-call copy
/// that is valid for at least the configured expiry margin and must not be
/// stored beyond the call it was obtained for.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    token: String,
    /// When the authority will stop accepting this token.
    pub expires_at: DateTime<Utc>,
    /// Authority-assigned context identifier for this session.
    pub context_reference: String,
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
        context_reference: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            expires_at,
            context_reference: context_reference.into(),
        }
    }

    /// The bearer token to present on authenticated calls.
    pub fn bearer_token(&self) -> &str {
        &self.token
    }

    /// Whether the session expires within `margin` of `now`. Such a
    /// session must not be used to sign a new request.
    pub fn expires_within(&self, margin: std::time::Duration, now: DateTime<Utc>) -> bool {
        let remaining = (self.expires_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        remaining <= margin
    }
}

// Token never appears in logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("context_reference", &self.context_reference)
            .finish()
    }
}
