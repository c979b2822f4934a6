//! Session lifecycle: challenge-response authentication, transparent
//! renewal, revocation.
//!
//! The manager owns the only mutable copy of the session. Everything
//! else receives per-call clones guaranteed valid for at least the
//! configured margin and must not hold on to them.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::core::{KsefConfig, KsefError, Nip, Session};
use crate::crypto::IdentityCredential;
use crate::transport::{
    AuthenticateRequest, AuthorityApi, ChallengeRequest, execute,
};

/// Canonical byte string the client signs to answer a challenge.
///
/// The authority verifies the signature over exactly this layout:
/// the challenge nonce, the taxpayer identifier and the RFC 3339
/// challenge timestamp, joined by newlines.
pub fn auth_payload(challenge: &str, nip: &Nip, timestamp: DateTime<Utc>) -> String {
    format!("{challenge}\n{nip}\n{}", timestamp.to_rfc3339())
}

/// Maintains one authenticated session per taxpayer context.
///
/// [`SessionManager::active_session`] hands out sessions valid for at
/// least the configured margin, re-authenticating transparently when
/// the current one approaches expiry. Concurrent callers are
/// serialized on one lock so a single challenge-response exchange is
/// in flight at a time; waiters reuse its result.
pub struct SessionManager {
    api: Arc<dyn AuthorityApi>,
    config: Arc<KsefConfig>,
    credential: IdentityCredential,
    cancel: CancellationToken,
    slot: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn AuthorityApi>,
        config: Arc<KsefConfig>,
        credential: IdentityCredential,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            credential,
            cancel,
            slot: Mutex::new(None),
        }
    }

    /// A session valid for at least the configured expiry margin.
    ///
    /// Suspends while an authentication exchange is in flight; callers
    /// arriving during the exchange reuse its result instead of
    /// opening their own.
    pub async fn active_session(&self) -> Result<Session, KsefError> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.expires_within(self.config.session_margin, Utc::now()) {
                return Ok(session.clone());
            }
            tracing::info!(
                expires_at = %session.expires_at,
                "session inside expiry margin, renewing"
            );
        }
        let session = self.authenticate_locked().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Run `op` under the active session, absorbing one server-side
    /// invalidation.
    ///
    /// If `op` reports [`KsefError::SessionInvalid`], the stored
    /// session is discarded and `op` runs once more under a freshly
    /// authenticated one; a second invalidation surfaces to the
    /// caller.
    pub async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, KsefError>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T, KsefError>>,
    {
        let session = self.active_session().await?;
        match op(session.clone()).await {
            Err(KsefError::SessionInvalid(reason)) => {
                tracing::info!(%reason, "authority rejected session, re-authenticating once");
                self.invalidate_if_current(&session).await;
                let fresh = self.active_session().await?;
                op(fresh).await
            }
            other => other,
        }
    }

    /// Revoke the current session remotely and forget it locally.
    ///
    /// A no-op when no session is held. The local copy is dropped
    /// before the revoke call goes out, so the token is never reused
    /// even if revocation fails.
    pub async fn logout(&self) -> Result<(), KsefError> {
        let taken = self.slot.lock().await.take();
        let Some(session) = taken else {
            return Ok(());
        };
        let api = self.api.as_ref();
        let token = session.bearer_token();
        execute(&self.config.retry, &self.cancel, |_| async move {
            api.revoke(token).await
        })
        .await?;
        tracing::info!(context = %session.context_reference, "session revoked");
        Ok(())
    }

    /// Drop the stored session if it is still the one `stale` refers
    /// to. A newer session established by a concurrent caller is left
    /// alone.
    async fn invalidate_if_current(&self, stale: &Session) {
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.as_ref() {
            if current.bearer_token() == stale.bearer_token() {
                *slot = None;
            }
        }
    }

    /// Full challenge-response exchange. Caller holds the slot lock.
    async fn authenticate_locked(&self) -> Result<Session, KsefError> {
        let api = self.api.as_ref();

        let challenge_request = ChallengeRequest {
            context_identifier: self.config.nip.clone(),
        };
        let request = &challenge_request;
        let challenge = execute(&self.config.retry, &self.cancel, |_| async move {
            api.request_challenge(request).await
        })
        .await?;
        tracing::debug!(timestamp = %challenge.timestamp, "challenge issued");

        let payload = auth_payload(&challenge.challenge, &self.config.nip, challenge.timestamp);
        let signature = self.credential.sign(payload.as_bytes())?;

        let auth_request = AuthenticateRequest {
            challenge: challenge.challenge,
            signed_challenge: BASE64.encode(signature),
            context_identifier: self.config.nip.clone(),
        };
        let request = &auth_request;
        let response = execute(&self.config.retry, &self.cancel, |_| async move {
            api.authenticate(request).await
        })
        .await?;

        let session = Session::new(
            response.session_token,
            response.expires_at,
            response.context_reference,
        );
        tracing::info!(
            context = %session.context_reference,
            expires_at = %session.expires_at,
            "authenticated"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn auth_payload_layout() {
        let nip = Nip::parse("5260250274").unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let payload = auth_payload("nonce-abc", &nip, ts);
        assert_eq!(payload, "nonce-abc\n5260250274\n2025-06-01T12:00:00+00:00");
    }

    #[test]
    fn auth_payload_differs_per_challenge() {
        let nip = Nip::parse("5260250274").unwrap();
        let ts = Utc::now();
        assert_ne!(
            auth_payload("challenge-1", &nip, ts),
            auth_payload("challenge-2", &nip, ts)
        );
    }
}
