//! Splitting document sets into transmissible batches.

use crate::core::config::BatchLimits;
use crate::core::error::KsefError;
use crate::core::types::InvoiceDocument;

/// Split `documents` into batches that respect `limits`.
///
/// Documents are packed greedily in the order supplied; a new batch is
/// opened whenever adding the next document would exceed the byte or
/// count limit. Batch size counts raw document bytes, before
/// serialization and encryption. Every input document appears in
/// exactly one batch, in its original position relative to its batch
/// neighbours.
///
/// Fails with [`KsefError::PayloadTooLarge`] before anything is
/// planned if any single document exceeds the per-invoice limit (or
/// the batch byte limit, whichever is smaller), so an oversized
/// document never reaches the wire.
pub fn plan_batches(
    documents: Vec<InvoiceDocument>,
    limits: &BatchLimits,
) -> Result<Vec<Vec<InvoiceDocument>>, KsefError> {
    let per_document_cap = limits.max_invoice_bytes.min(limits.max_batch_bytes);
    for doc in &documents {
        if doc.byte_len() > per_document_cap {
            return Err(KsefError::PayloadTooLarge {
                size: doc.byte_len(),
                limit: per_document_cap,
            });
        }
    }

    let mut batches: Vec<Vec<InvoiceDocument>> = Vec::new();
    let mut current: Vec<InvoiceDocument> = Vec::new();
    let mut current_bytes = 0usize;

    for doc in documents {
        let over_bytes = current_bytes + doc.byte_len() > limits.max_batch_bytes;
        let over_count = current.len() >= limits.max_batch_invoices;
        if !current.is_empty() && (over_bytes || over_count) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += doc.byte_len();
        current.push(doc);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CorrelationId;

    fn doc(bytes: usize) -> InvoiceDocument {
        InvoiceDocument::new(vec![b'x'; bytes])
    }

    fn limits(invoice: usize, batch: usize, count: usize) -> BatchLimits {
        BatchLimits {
            max_invoice_bytes: invoice,
            max_batch_bytes: batch,
            max_batch_invoices: count,
        }
    }

    #[test]
    fn empty_input_plans_nothing() {
        let plan = plan_batches(vec![], &BatchLimits::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn single_document_single_batch() {
        let plan = plan_batches(vec![doc(100)], &BatchLimits::default()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].len(), 1);
    }

    #[test]
    fn splits_on_count_limit() {
        let docs: Vec<_> = (0..5).map(|_| doc(10)).collect();
        let plan = plan_batches(docs, &limits(100, 1000, 2)).unwrap();
        let sizes: Vec<_> = plan.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn splits_on_byte_limit() {
        let docs: Vec<_> = (0..5).map(|_| doc(40)).collect();
        let plan = plan_batches(docs, &limits(100, 100, 10)).unwrap();
        let sizes: Vec<_> = plan.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn preserves_order_and_covers_exactly_once() {
        let docs: Vec<_> = (0..7).map(|i| doc(10 + i)).collect();
        let ids: Vec<CorrelationId> = docs.iter().map(InvoiceDocument::correlation_id).collect();
        let plan = plan_batches(docs, &limits(100, 35, 10)).unwrap();
        let flattened: Vec<CorrelationId> = plan
            .iter()
            .flatten()
            .map(InvoiceDocument::correlation_id)
            .collect();
        assert_eq!(flattened, ids);
    }

    #[test]
    fn batch_count_matches_count_limit() {
        let docs: Vec<_> = (0..10).map(|_| doc(1)).collect();
        let plan = plan_batches(docs, &limits(10, 1000, 3)).unwrap();
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn document_at_limit_accepted() {
        let plan = plan_batches(vec![doc(100)], &limits(100, 1000, 10)).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn oversized_document_rejected_up_front() {
        let err = plan_batches(vec![doc(50), doc(101)], &limits(100, 1000, 10)).unwrap_err();
        match err {
            KsefError::PayloadTooLarge { size, limit } => {
                assert_eq!(size, 101);
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn batch_byte_limit_caps_single_document() {
        // Incoherent limits: per-invoice cap larger than the batch cap.
        // The smaller bound wins so no batch can ever exceed it.
        let err = plan_batches(vec![doc(150)], &limits(200, 100, 10)).unwrap_err();
        assert!(matches!(err, KsefError::PayloadTooLarge { limit: 100, .. }));
    }

    #[test]
    fn every_batch_within_limits() {
        let docs: Vec<_> = (0..20).map(|i| doc(10 + (i % 7))).collect();
        let lim = limits(50, 40, 3);
        let plan = plan_batches(docs, &lim).unwrap();
        for batch in &plan {
            assert!(batch.len() <= lim.max_batch_invoices);
            let bytes: usize = batch.iter().map(InvoiceDocument::byte_len).sum();
            assert!(bytes <= lim.max_batch_bytes);
        }
    }
}
