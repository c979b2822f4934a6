//! Status polling until records reach terminal outcomes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::core::{BatchHandle, KsefConfig, KsefError, Resolution, SubmissionReport};
use crate::session::SessionManager;
use crate::submit::store::{SubmissionSet, SubmissionStore};
use crate::transport::{AuthorityApi, CallError, InvoiceStatusEntry, WireInvoiceStatus};

/// Outcome of polling one batch reference once.
enum PollOutcome {
    Entries(Vec<InvoiceStatusEntry>),
    /// Transient failure; the next tick is the retry.
    TryAgain(String),
}

/// Drives open records to their terminal states by querying the
/// authority.
pub struct StatusPoller {
    api: Arc<dyn AuthorityApi>,
    config: Arc<KsefConfig>,
    session: Arc<SessionManager>,
    store: Arc<SubmissionStore>,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub(crate) fn new(
        api: Arc<dyn AuthorityApi>,
        config: Arc<KsefConfig>,
        session: Arc<SessionManager>,
        store: Arc<SubmissionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            session,
            store,
            cancel,
        }
    }

    /// Poll until every record behind `handle` is terminal or
    /// `timeout` elapses, then report all of them.
    ///
    /// One request covers all outstanding records of a batch; the
    /// interval between polls grows up to the configured maximum. A
    /// transiently failing poll is logged and retried on the next
    /// tick. Records still open when the window closes are reported
    /// as [`Resolution::TimedOut`]; their stored state is untouched, a
    /// later wait can pick them up again. At least one poll happens
    /// even with a zero timeout.
    pub async fn poll_until_terminal(
        &self,
        handle: BatchHandle,
        timeout: Duration,
    ) -> Result<Vec<SubmissionReport>, KsefError> {
        let deadline = Instant::now() + timeout;
        let mut ticks = 0u32;

        loop {
            if self.store.read(handle, SubmissionSet::all_terminal)? {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(KsefError::Cancelled),
                result = self.poll_once(handle) => result?,
            }
            if self.store.read(handle, SubmissionSet::all_terminal)? {
                break;
            }

            let wait = self.config.poll.interval_after(ticks);
            ticks += 1;
            let next = Instant::now() + wait;
            if next >= deadline {
                tracing::debug!(%handle, "polling window closed");
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(KsefError::Cancelled),
                _ = sleep_until(next) => {}
            }
        }

        let records = self.store.read(handle, SubmissionSet::records_snapshot)?;
        let reports: Vec<SubmissionReport> = records
            .into_iter()
            .map(|record| SubmissionReport {
                resolution: Resolution::of(record.state),
                record,
            })
            .collect();
        let (mut accepted, mut rejected, mut timed_out) = (0, 0, 0);
        for report in &reports {
            match report.resolution {
                Resolution::Accepted => accepted += 1,
                Resolution::Rejected => rejected += 1,
                Resolution::TimedOut => timed_out += 1,
            }
        }
        tracing::info!(%handle, accepted, rejected, timed_out, "polling finished");
        Ok(reports)
    }

    /// One tick: query every batch that still has open records.
    async fn poll_once(&self, handle: BatchHandle) -> Result<(), KsefError> {
        let outstanding: Vec<(usize, String)> = self.store.read(handle, |set| {
            set.batches
                .iter()
                .enumerate()
                .filter_map(|(index, batch)| {
                    let reference = batch.batch_reference.as_ref()?;
                    batch
                        .records
                        .iter()
                        .any(|r| !r.state.is_terminal())
                        .then(|| (index, reference.clone()))
                })
                .collect()
        })?;

        for (index, reference) in outstanding {
            match self.poll_reference(&reference).await? {
                PollOutcome::Entries(entries) => {
                    self.apply_entries(handle, index, &reference, entries)?;
                }
                PollOutcome::TryAgain(reason) => {
                    tracing::warn!(%reference, %reason, "status poll failed, retrying next tick");
                }
            }
        }
        Ok(())
    }

    /// Single status request for one batch reference.
    ///
    /// Transient failures come back as [`PollOutcome::TryAgain`]; a
    /// terminal failure propagates and aborts the wait.
    async fn poll_reference(&self, reference: &str) -> Result<PollOutcome, KsefError> {
        let api = self.api.as_ref();
        self.session
            .with_session(move |session| async move {
                match api.poll_status(session.bearer_token(), reference).await {
                    Ok(response) => Ok(PollOutcome::Entries(response.entries)),
                    Err(CallError::Transient(reason)) => Ok(PollOutcome::TryAgain(reason)),
                    Err(CallError::Terminal(err)) => Err(err),
                }
            })
            .await
    }

    /// Fold poll entries into the batch's records.
    fn apply_entries(
        &self,
        handle: BatchHandle,
        index: usize,
        reference: &str,
        entries: Vec<InvoiceStatusEntry>,
    ) -> Result<(), KsefError> {
        self.store.modify(handle, |set| {
            let batch = &mut set.batches[index];
            for entry in entries {
                let Some(record) = batch
                    .records
                    .iter_mut()
                    .find(|r| r.correlation_id == entry.correlation_id)
                else {
                    tracing::warn!(
                        %reference,
                        correlation_id = %entry.correlation_id,
                        "status entry for a document this batch does not track"
                    );
                    continue;
                };
                // Terminal records never transition again.
                if record.state.is_terminal() {
                    continue;
                }
                match entry.status {
                    WireInvoiceStatus::Accepted => {
                        tracing::debug!(
                            correlation_id = %entry.correlation_id,
                            ksef_number = entry.ksef_number.as_deref().unwrap_or(""),
                            "invoice accepted"
                        );
                        record.mark_accepted(entry.ksef_number, entry.status_code);
                    }
                    WireInvoiceStatus::Rejected => {
                        tracing::debug!(
                            correlation_id = %entry.correlation_id,
                            reason_code = entry.reason_code.as_deref().unwrap_or(""),
                            "invoice rejected"
                        );
                        record.mark_rejected(entry.reason_code, entry.status_code);
                    }
                    WireInvoiceStatus::Pending => {
                        if entry.status_code.is_some() {
                            record.last_status_code = entry.status_code;
                        }
                    }
                    WireInvoiceStatus::Unknown => {
                        tracing::debug!(
                            correlation_id = %entry.correlation_id,
                            "unrecognized status, treating as still pending"
                        );
                    }
                }
            }
        })
    }
}
