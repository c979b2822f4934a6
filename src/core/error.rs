use thiserror::Error;

/// Errors surfaced by the KSeF client engine.
///
/// Transient network failures are retried internally and never appear here
/// directly — after the retry budget is spent they surface as
/// [`KsefError::ExhaustedRetries`] carrying the last observed failure.
/// Terminal failures surface immediately with the authority's reason code
/// preserved.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KsefError {
    /// Missing or inconsistent configuration or credential material.
    /// Raised before any network call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A plaintext exceeds the configured maximum payload size.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Size of the offending payload in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// A cryptographic operation failed (encryption, key wrapping, signing).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Every retry attempt failed with a transient classification.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Description of the last transient failure observed.
        last_error: String,
    },

    /// The session token was rejected by the authority or has been revoked.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The authority rejected a submission for business reasons. Terminal
    /// per invoice — resubmission requires a corrected document.
    #[error("submission rejected with reason {reason_code}: {message}")]
    ValidationRejected {
        /// The authority's rejection reason code (e.g. "R001").
        reason_code: String,
        /// Human-readable detail from the authority, if any.
        message: String,
    },

    /// A confirmation was requested for an invoice that has not reached
    /// the Accepted state.
    #[error("confirmation not yet available for invoice {0}")]
    NotYetAvailable(String),

    /// A received confirmation failed signature verification and the
    /// caller demanded a cryptographically trusted artifact.
    #[error("confirmation signature verification failed for invoice {0}")]
    VerificationFailed(String),

    /// The server response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller's cancellation signal fired while waiting.
    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_too_large_message() {
        let err = KsefError::PayloadTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "payload of 2048 bytes exceeds the 1024 byte limit"
        );
    }

    #[test]
    fn rejection_keeps_reason_code() {
        let err = KsefError::ValidationRejected {
            reason_code: "R001".into(),
            message: "seller NIP unknown".into(),
        };
        assert!(err.to_string().contains("R001"));
    }
}
