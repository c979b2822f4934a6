//! In-memory tracking state for submitted batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::core::{BatchHandle, CorrelationId, InvoiceDocument, KsefError, SubmissionRecord};
use crate::transport::SubmitBatchRequest;

/// One batch as tracked between sealing and terminal processing.
///
/// The sealed request is kept until the server acknowledges the batch
/// so a transient transmission failure can be resubmitted byte for
/// byte under the same idempotency token; it is dropped on acceptance.
/// The symmetric key is long gone by the time this exists.
#[derive(Debug)]
pub(crate) struct InvoiceBatch {
    pub idempotency_token: Uuid,
    pub batch_reference: Option<String>,
    pub records: Vec<SubmissionRecord>,
    pub pending_request: Option<Arc<SubmitBatchRequest>>,
}

impl InvoiceBatch {
    pub(crate) fn new(documents: &[InvoiceDocument], request: SubmitBatchRequest) -> Self {
        let records = documents
            .iter()
            .map(|doc| SubmissionRecord::new(doc.correlation_id()))
            .collect();
        Self {
            idempotency_token: request.idempotency_token,
            batch_reference: None,
            records,
            pending_request: Some(Arc::new(request)),
        }
    }
}

/// All batches created by one `submit` call.
#[derive(Debug)]
pub(crate) struct SubmissionSet {
    pub batches: Vec<InvoiceBatch>,
}

impl SubmissionSet {
    pub(crate) fn new(batches: Vec<InvoiceBatch>) -> Self {
        Self { batches }
    }

    /// Record snapshots in submission order.
    pub(crate) fn records_snapshot(&self) -> Vec<SubmissionRecord> {
        self.batches
            .iter()
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    /// True once no record can change any more.
    pub(crate) fn all_terminal(&self) -> bool {
        self.batches
            .iter()
            .all(|b| b.records.iter().all(|r| r.state.is_terminal()))
    }
}

/// Submission state shared by the pipeline, the poller and the UPO
/// service.
///
/// Plain mutex; every access is a short synchronous read or update,
/// never held across a suspension point.
#[derive(Default)]
pub(crate) struct SubmissionStore {
    inner: Mutex<HashMap<BatchHandle, SubmissionSet>>,
}

impl SubmissionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, handle: BatchHandle, set: SubmissionSet) {
        self.lock().insert(handle, set);
    }

    /// Run `f` on the set behind `handle`.
    pub(crate) fn modify<R>(
        &self,
        handle: BatchHandle,
        f: impl FnOnce(&mut SubmissionSet) -> R,
    ) -> Result<R, KsefError> {
        let mut guard = self.lock();
        let set = guard.get_mut(&handle).ok_or_else(|| unknown(handle))?;
        Ok(f(set))
    }

    /// Run `f` on an immutable view of the set behind `handle`.
    pub(crate) fn read<R>(
        &self,
        handle: BatchHandle,
        f: impl FnOnce(&SubmissionSet) -> R,
    ) -> Result<R, KsefError> {
        let guard = self.lock();
        let set = guard.get(&handle).ok_or_else(|| unknown(handle))?;
        Ok(f(set))
    }

    /// Remove the set behind `handle`, transferring its records out.
    pub(crate) fn remove(&self, handle: BatchHandle) -> Result<Vec<SubmissionRecord>, KsefError> {
        let set = self.lock().remove(&handle).ok_or_else(|| unknown(handle))?;
        Ok(set.records_snapshot())
    }

    /// Look a record up by its document id, across all handles.
    pub(crate) fn find_record(&self, correlation_id: CorrelationId) -> Option<SubmissionRecord> {
        let guard = self.lock();
        guard
            .values()
            .flat_map(|set| set.batches.iter())
            .flat_map(|batch| batch.records.iter())
            .find(|record| record.correlation_id == correlation_id)
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BatchHandle, SubmissionSet>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn unknown(handle: BatchHandle) -> KsefError {
    KsefError::Configuration(format!("unknown batch handle {handle}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentState;

    fn set_with_one_doc() -> (SubmissionSet, CorrelationId) {
        let doc = InvoiceDocument::new(&b"<xml/>"[..]);
        let id = doc.correlation_id();
        let request = SubmitBatchRequest {
            idempotency_token: Uuid::new_v4(),
            encrypted_payload: String::new(),
            wrapped_key: String::new(),
            signature: String::new(),
            manifest: vec![],
        };
        let batch = InvoiceBatch::new(std::slice::from_ref(&doc), request);
        (SubmissionSet::new(vec![batch]), id)
    }

    #[test]
    fn records_start_queued() {
        let (set, id) = set_with_one_doc();
        let records = set.records_snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, id);
        assert_eq!(records[0].state, DocumentState::Queued);
        assert!(!set.all_terminal());
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let store = SubmissionStore::new();
        let handle = BatchHandle::generate();
        assert!(store.read(handle, |_| ()).is_err());
        assert!(store.modify(handle, |_| ()).is_err());
        assert!(store.remove(handle).is_err());
    }

    #[test]
    fn remove_transfers_records() {
        let store = SubmissionStore::new();
        let (set, id) = set_with_one_doc();
        let handle = BatchHandle::generate();
        store.insert(handle, set);

        let records = store.remove(handle).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, id);
        assert!(store.read(handle, |_| ()).is_err());
    }

    #[test]
    fn find_record_spans_handles() {
        let store = SubmissionStore::new();
        let (first, first_id) = set_with_one_doc();
        let (second, second_id) = set_with_one_doc();
        store.insert(BatchHandle::generate(), first);
        store.insert(BatchHandle::generate(), second);

        assert!(store.find_record(first_id).is_some());
        assert!(store.find_record(second_id).is_some());
        assert!(store.find_record(CorrelationId::generate()).is_none());
    }

    #[test]
    fn modify_updates_in_place() {
        let store = SubmissionStore::new();
        let (set, _) = set_with_one_doc();
        let handle = BatchHandle::generate();
        store.insert(handle, set);

        store
            .modify(handle, |set| {
                set.batches[0].batch_reference = Some("batch-1".into());
            })
            .unwrap();
        let reference = store
            .read(handle, |set| set.batches[0].batch_reference.clone())
            .unwrap();
        assert_eq!(reference.as_deref(), Some("batch-1"));
    }
}
