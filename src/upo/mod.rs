//! Retrieval and verification of official receipt confirmations (UPO).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio_util::sync::CancellationToken;

use crate::core::{
    CorrelationId, DocumentState, KsefConfig, KsefError, UpoArtifact, VerificationStatus,
};
use crate::crypto::{AuthorityKeys, verify};
use crate::session::SessionManager;
use crate::submit::store::SubmissionStore;
use crate::transport::{AuthorityApi, execute};

/// Fetches signed confirmation documents for accepted invoices.
pub struct UpoService {
    api: Arc<dyn AuthorityApi>,
    config: Arc<KsefConfig>,
    authority_keys: AuthorityKeys,
    session: Arc<SessionManager>,
    store: Arc<SubmissionStore>,
    cancel: CancellationToken,
}

impl UpoService {
    pub(crate) fn new(
        api: Arc<dyn AuthorityApi>,
        config: Arc<KsefConfig>,
        authority_keys: AuthorityKeys,
        session: Arc<SessionManager>,
        store: Arc<SubmissionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            authority_keys,
            session,
            store,
            cancel,
        }
    }

    /// Fetch the signed confirmation for one accepted invoice.
    ///
    /// Only records in the accepted state have a confirmation; any
    /// other state fails with [`KsefError::NotYetAvailable`]. The
    /// document's signature is checked against the authority's
    /// verification key and the artifact comes back flagged with the
    /// outcome — a failed check never discards the document. Callers
    /// that must not act on an untrusted confirmation chain
    /// [`UpoArtifact::require_valid`] on the result.
    pub async fn fetch_confirmation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<UpoArtifact, KsefError> {
        let record = self.store.find_record(correlation_id).ok_or_else(|| {
            KsefError::Configuration(format!("no record tracks document {correlation_id}"))
        })?;
        if record.state != DocumentState::Accepted {
            return Err(KsefError::NotYetAvailable(format!(
                "document {correlation_id} is {:?}; confirmations exist only for accepted invoices",
                record.state
            )));
        }

        let api = self.api.as_ref();
        let retry = &self.config.retry;
        let cancel = &self.cancel;
        let response = self
            .session
            .with_session(move |session| async move {
                execute(retry, cancel, |_| {
                    let token = session.bearer_token();
                    async move { api.fetch_upo(token, correlation_id).await }
                })
                .await
            })
            .await?;

        let document = BASE64.decode(&response.document).map_err(|e| {
            KsefError::Protocol(format!("confirmation document is not valid base64: {e}"))
        })?;

        let verification = match response.signature.as_deref() {
            None => {
                tracing::warn!(%correlation_id, "confirmation arrived unsigned");
                VerificationStatus::Unverifiable
            }
            Some(signature_b64) => match BASE64.decode(signature_b64) {
                Ok(signature)
                    if verify(
                        &document,
                        &signature,
                        self.authority_keys.verification_key(),
                    ) =>
                {
                    VerificationStatus::Valid
                }
                Ok(_) => VerificationStatus::Invalid,
                // A signature that is not even base64 cannot verify.
                Err(_) => VerificationStatus::Invalid,
            },
        };
        if verification == VerificationStatus::Invalid {
            tracing::warn!(%correlation_id, "confirmation signature failed verification");
        }

        Ok(UpoArtifact {
            correlation_id,
            document,
            verification,
        })
    }
}
