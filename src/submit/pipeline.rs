//! Batch submission: planning, sealing, transmission, resumption.

use std::cell::Cell;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    BatchHandle, InvoiceDocument, KsefConfig, KsefError, SubmissionRecord, plan_batches,
};
use crate::crypto::{AuthorityKeys, IdentityCredential};
use crate::session::SessionManager;
use crate::submit::envelope::seal_batch;
use crate::submit::store::{InvoiceBatch, SubmissionSet, SubmissionStore};
use crate::transport::{AuthorityApi, SubmitBatchRequest, execute};

/// Turns document sets into transmitted batches and keeps their
/// records current.
pub struct SubmissionPipeline {
    api: Arc<dyn AuthorityApi>,
    config: Arc<KsefConfig>,
    credential: IdentityCredential,
    authority_keys: AuthorityKeys,
    session: Arc<SessionManager>,
    store: Arc<SubmissionStore>,
    cancel: CancellationToken,
}

impl SubmissionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        api: Arc<dyn AuthorityApi>,
        config: Arc<KsefConfig>,
        credential: IdentityCredential,
        authority_keys: AuthorityKeys,
        session: Arc<SessionManager>,
        store: Arc<SubmissionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            credential,
            authority_keys,
            session,
            store,
            cancel,
        }
    }

    /// Split, seal and transmit `documents`, returning a handle for
    /// status tracking. Does not wait for processing outcomes.
    ///
    /// Fails before any network traffic if a document exceeds the
    /// payload limit or the input is empty. A batch whose transmission
    /// keeps failing transiently stays queued behind the handle and is
    /// resubmitted by the next completion wait; the whole call fails
    /// only when no batch reached the authority at all. On
    /// cancellation, batches already accepted by the server stay
    /// tracked under the returned handle.
    pub async fn submit(&self, documents: Vec<InvoiceDocument>) -> Result<BatchHandle, KsefError> {
        if documents.is_empty() {
            return Err(KsefError::Configuration("no documents to submit".into()));
        }
        let document_count = documents.len();
        let planned = plan_batches(documents, &self.config.limits)?;

        let mut batches = Vec::with_capacity(planned.len());
        for docs in &planned {
            let request = seal_batch(
                docs,
                &self.authority_keys,
                &self.credential,
                self.config.limits.max_batch_bytes,
            )?;
            batches.push(InvoiceBatch::new(docs, request));
        }

        let handle = BatchHandle::generate();
        self.store.insert(handle, SubmissionSet::new(batches));
        tracing::info!(
            %handle,
            documents = document_count,
            batches = planned.len(),
            "submitting"
        );

        let mut accepted = 0usize;
        let mut cancelled = false;
        let mut last_error: Option<KsefError> = None;
        for index in 0..planned.len() {
            match self.transmit_batch(handle, index).await {
                Ok(()) => accepted += 1,
                Err(KsefError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(%handle, index, error = %err, "batch transmission failed");
                    last_error = Some(err);
                }
            }
        }

        if accepted == 0 {
            // Nothing reached the authority; drop the tracking state
            // and surface the failure directly.
            let _ = self.store.remove(handle);
            return Err(if cancelled {
                KsefError::Cancelled
            } else {
                last_error
                    .unwrap_or_else(|| KsefError::Protocol("batch transmission failed".into()))
            });
        }
        if cancelled {
            tracing::warn!(%handle, "submission cancelled after partial acceptance");
        }
        Ok(handle)
    }

    /// Resubmit every batch under `handle` that never got accepted,
    /// reusing the sealed request and its idempotency token.
    ///
    /// Failures other than cancellation leave the batch queued and
    /// move on; its records surface as timed out if it never makes it.
    pub async fn resume_pending(&self, handle: BatchHandle) -> Result<(), KsefError> {
        let pending: Vec<usize> = self.store.read(handle, |set| {
            set.batches
                .iter()
                .enumerate()
                .filter(|(_, batch)| batch.pending_request.is_some())
                .map(|(index, _)| index)
                .collect()
        })?;

        for index in pending {
            match self.transmit_batch(handle, index).await {
                Ok(()) => {}
                Err(KsefError::Cancelled) => return Err(KsefError::Cancelled),
                Err(err) => {
                    tracing::warn!(%handle, index, error = %err, "resubmission failed");
                }
            }
        }
        Ok(())
    }

    /// Drop all tracking state behind `handle`, transferring the final
    /// records to the caller.
    pub fn purge(&self, handle: BatchHandle) -> Result<Vec<SubmissionRecord>, KsefError> {
        let records = self.store.remove(handle)?;
        tracing::debug!(%handle, records = records.len(), "purged");
        Ok(records)
    }

    /// One transmission round for one batch, including rollback.
    async fn transmit_batch(&self, handle: BatchHandle, index: usize) -> Result<(), KsefError> {
        let pending = self.store.modify(handle, |set| {
            let batch = &mut set.batches[index];
            let request = batch.pending_request.clone()?;
            let now = Utc::now();
            for record in &mut batch.records {
                record.mark_uploading(now);
            }
            Some((request, batch.idempotency_token))
        })?;
        let Some((request, idempotency_token)) = pending else {
            // Already accepted in an earlier round.
            return Ok(());
        };
        tracing::debug!(%handle, index, %idempotency_token, "transmitting batch");

        // Wire attempts are counted across session retries so records
        // reflect what actually went out.
        let attempts = Cell::new(0u32);
        let last_started = Cell::new(Utc::now());

        let api = self.api.as_ref();
        let retry = &self.config.retry;
        let cancel = &self.cancel;
        let request_ref: &SubmitBatchRequest = &request;
        let attempts_ref = &attempts;
        let started_ref = &last_started;
        let outcome = self
            .session
            .with_session(move |session| async move {
                execute(retry, cancel, |_| {
                    let token = session.bearer_token();
                    async move {
                        attempts_ref.set(attempts_ref.get() + 1);
                        started_ref.set(Utc::now());
                        api.submit_batch(token, request_ref).await
                    }
                })
                .await
            })
            .await;

        let wire_attempts = attempts.get();
        let stamped = last_started.get();
        match outcome {
            Ok(response) => {
                let reference = response.batch_reference;
                self.store.modify(handle, |set| {
                    let batch = &mut set.batches[index];
                    batch.batch_reference = Some(reference.clone());
                    batch.pending_request = None;
                    for record in &mut batch.records {
                        record.record_attempts(wire_attempts, stamped);
                        record.mark_awaiting(None);
                    }
                })?;
                tracing::info!(%handle, index, %reference, "batch accepted for processing");
                Ok(())
            }
            Err(err) => {
                self.store.modify(handle, |set| {
                    let batch = &mut set.batches[index];
                    // Cancellation can strike before the first attempt;
                    // only attempts that actually started are counted.
                    if wire_attempts > 0 {
                        for record in &mut batch.records {
                            record.record_attempts(wire_attempts, stamped);
                        }
                    }
                    match &err {
                        KsefError::ValidationRejected {
                            reason_code,
                            message,
                        } => {
                            // The authority rejected the whole envelope;
                            // every document in it is terminally rejected.
                            batch.pending_request = None;
                            for record in &mut batch.records {
                                record.mark_rejected(Some(reason_code.clone()), None);
                                record.last_error = Some(message.clone());
                            }
                        }
                        other => {
                            for record in &mut batch.records {
                                record.roll_back(other.to_string());
                            }
                        }
                    }
                })?;
                Err(err)
            }
        }
    }
}
