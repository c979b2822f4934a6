//! How document sets split into batches under different limits.
//!
//! Run with: `cargo run --example batch_split`

use ksef::core::*;

fn documents(sizes: &[usize]) -> Vec<InvoiceDocument> {
    sizes
        .iter()
        .map(|&n| InvoiceDocument::new(vec![b'x'; n]))
        .collect()
}

fn show(label: &str, sizes: &[usize], limits: &BatchLimits) {
    println!("  {label}:");
    println!(
        "    limits: {} B/invoice, {} B/batch, {} invoices/batch",
        limits.max_invoice_bytes, limits.max_batch_bytes, limits.max_batch_invoices
    );
    match plan_batches(documents(sizes), limits) {
        Ok(plan) => {
            for (i, batch) in plan.iter().enumerate() {
                let bytes: usize = batch.iter().map(InvoiceDocument::byte_len).sum();
                println!("    batch {}: {} invoices, {} bytes", i + 1, batch.len(), bytes);
            }
        }
        Err(e) => println!("    REJECTED: {e}"),
    }
    println!();
}

fn main() {
    println!("=== Batch Planning ===\n");

    show(
        "Five small invoices, default limits",
        &[2_048, 2_048, 2_048, 2_048, 2_048],
        &BatchLimits::default(),
    );

    show(
        "Count cap of two",
        &[100, 100, 100, 100, 100],
        &BatchLimits {
            max_invoice_bytes: 1_024,
            max_batch_bytes: 10_240,
            max_batch_invoices: 2,
        },
    );

    show(
        "Byte cap splits mid-stream",
        &[600, 600, 600, 600],
        &BatchLimits {
            max_invoice_bytes: 1_024,
            max_batch_bytes: 2_048,
            max_batch_invoices: 100,
        },
    );

    show(
        "Oversized scan attachment",
        &[512, 3_000, 512],
        &BatchLimits {
            max_invoice_bytes: 2_048,
            max_batch_bytes: 8_192,
            max_batch_invoices: 100,
        },
    );
}
