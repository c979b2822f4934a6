//! The high-level client.
//!
//! [`KsefClient`] ties the session manager, the submission pipeline,
//! the status poller and confirmation retrieval together behind one
//! handle. All parts share a single cancellation token, so one
//! [`KsefClient::shutdown`] stops every in-flight exchange.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{
    BatchHandle, CorrelationId, InvoiceDocument, KsefConfig, KsefError, Session,
    SubmissionRecord, SubmissionReport, UpoArtifact,
};
use crate::crypto::{AuthorityKeys, IdentityCredential};
use crate::session::SessionManager;
use crate::status::StatusPoller;
use crate::submit::SubmissionPipeline;
use crate::submit::store::SubmissionStore;
use crate::transport::{AuthorityApi, HttpAuthority};
use crate::upo::UpoService;

/// Assembles a [`KsefClient`].
///
/// Configuration, the signing credential and the authority's public
/// keys are always needed; the transport and the cancellation token
/// have sensible defaults that can be overridden before [`build`].
///
/// [`build`]: KsefClientBuilder::build
pub struct KsefClientBuilder {
    config: KsefConfig,
    credential: IdentityCredential,
    authority_keys: AuthorityKeys,
    api: Option<Arc<dyn AuthorityApi>>,
    cancel: Option<CancellationToken>,
}

impl KsefClientBuilder {
    pub fn new(
        config: KsefConfig,
        credential: IdentityCredential,
        authority_keys: AuthorityKeys,
    ) -> Self {
        Self {
            config,
            credential,
            authority_keys,
            api: None,
            cancel: None,
        }
    }

    /// Replace the HTTP transport, e.g. with an in-memory authority
    /// double for tests.
    pub fn api(mut self, api: Arc<dyn AuthorityApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Tie the client into an existing shutdown tree.
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validate the configuration and wire the client up.
    pub fn build(self) -> Result<KsefClient, KsefError> {
        self.config.validate()?;
        let api: Arc<dyn AuthorityApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpAuthority::new(&self.config)?),
        };
        let config = Arc::new(self.config);
        let cancel = self.cancel.unwrap_or_default();
        let store = Arc::new(SubmissionStore::new());
        let session = Arc::new(SessionManager::new(
            api.clone(),
            config.clone(),
            self.credential.clone(),
            cancel.clone(),
        ));
        let pipeline = SubmissionPipeline::new(
            api.clone(),
            config.clone(),
            self.credential,
            self.authority_keys.clone(),
            session.clone(),
            store.clone(),
            cancel.clone(),
        );
        let poller = StatusPoller::new(
            api.clone(),
            config.clone(),
            session.clone(),
            store.clone(),
            cancel.clone(),
        );
        let upo = UpoService::new(
            api,
            config.clone(),
            self.authority_keys,
            session.clone(),
            store.clone(),
            cancel.clone(),
        );
        Ok(KsefClient {
            config,
            session,
            pipeline,
            poller,
            upo,
            store,
            cancel,
        })
    }
}

/// Client for one taxpayer context against one authority environment.
///
/// The client is cheap to share behind an `Arc` and all methods take
/// `&self`; sessions are established lazily and renewed transparently,
/// so callers never manage tokens themselves.
pub struct KsefClient {
    config: Arc<KsefConfig>,
    session: Arc<SessionManager>,
    pipeline: SubmissionPipeline,
    poller: StatusPoller,
    upo: UpoService,
    store: Arc<SubmissionStore>,
    cancel: CancellationToken,
}

impl KsefClient {
    /// Start building a client.
    pub fn builder(
        config: KsefConfig,
        credential: IdentityCredential,
        authority_keys: AuthorityKeys,
    ) -> KsefClientBuilder {
        KsefClientBuilder::new(config, credential, authority_keys)
    }

    pub fn config(&self) -> &KsefConfig {
        &self.config
    }

    /// The token every exchange of this client listens on.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every in-flight and future exchange.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Establish a session now instead of on first use.
    ///
    /// Useful to surface credential problems early; submission and
    /// polling authenticate on their own when needed.
    pub async fn authenticate(&self) -> Result<Session, KsefError> {
        self.session.active_session().await
    }

    /// Encrypt, sign and transmit a set of invoices.
    ///
    /// Documents are split into batches within the configured limits
    /// and each batch travels as one sealed envelope. The returned
    /// handle feeds [`await_completion`], [`records`] and [`purge`].
    ///
    /// [`await_completion`]: KsefClient::await_completion
    /// [`records`]: KsefClient::records
    /// [`purge`]: KsefClient::purge
    pub async fn submit(&self, documents: Vec<InvoiceDocument>) -> Result<BatchHandle, KsefError> {
        self.pipeline.submit(documents).await
    }

    /// Drive a submission to its outcome.
    ///
    /// Batches that failed transmission earlier are resubmitted under
    /// their original idempotency tokens, then the authority is polled
    /// until every document reaches a terminal state or `timeout`
    /// passes. Documents still undecided when the window closes are
    /// reported as timed out but keep their server-side state; calling
    /// again resumes where this left off.
    pub async fn await_completion(
        &self,
        handle: BatchHandle,
        timeout: Duration,
    ) -> Result<Vec<SubmissionReport>, KsefError> {
        self.pipeline.resume_pending(handle).await?;
        self.poller.poll_until_terminal(handle, timeout).await
    }

    /// Current per-document records of a submission, in order.
    pub fn records(&self, handle: BatchHandle) -> Result<Vec<SubmissionRecord>, KsefError> {
        self.store.read(handle, |set| set.records_snapshot())
    }

    /// Fetch the signed confirmation for an accepted invoice.
    pub async fn fetch_confirmation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<UpoArtifact, KsefError> {
        self.upo.fetch_confirmation(correlation_id).await
    }

    /// Drop all records of a submission, returning their final state.
    pub fn purge(&self, handle: BatchHandle) -> Result<Vec<SubmissionRecord>, KsefError> {
        self.pipeline.purge(handle)
    }

    /// Revoke the current session, if any.
    pub async fn logout(&self) -> Result<(), KsefError> {
        self.session.logout().await
    }
}
