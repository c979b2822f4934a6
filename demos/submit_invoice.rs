//! Full submission round trip against the in-memory authority stub:
//! authenticate, submit a small batch, wait for the outcome and fetch
//! the signed confirmation.
//!
//! Run with: `cargo run --example submit_invoice --features client`

use std::sync::Arc;
use std::time::Duration;

use ksef::KsefClient;
use ksef::core::*;
use ksef::crypto::IdentityCredential;
use ksef::stub::StubAuthority;

fn invoice(number: u32, total: &str) -> InvoiceDocument {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Faktura><Naglowek><KodFormularza>FA</KodFormularza>\
         <WariantFormularza>2</WariantFormularza></Naglowek>\
         <Podmiot1><NIP>5260250274</NIP></Podmiot1>\
         <Fa><P_2>FV/2025/{number:04}</P_2><P_15>{total}</P_15></Fa></Faktura>"
    );
    InvoiceDocument::new(xml.into_bytes())
}

#[tokio::main]
async fn main() -> Result<(), KsefError> {
    // The taxpayer's signing key and an authority double that really
    // decrypts what we send. A production setup points the builder at
    // Environment::Prod instead of installing a stub API.
    let credential = IdentityCredential::generate()?;
    let stub = Arc::new(StubAuthority::generate(credential.public_key())?);
    let config = KsefConfig::for_environment(Environment::Test, Nip::parse("526-025-02-74")?);

    let client = KsefClient::builder(config, credential, stub.authority_keys())
        .api(stub.clone())
        .build()?;

    println!("=== Session ===\n");
    let session = client.authenticate().await?;
    println!("  context:  {}", session.context_reference);
    println!("  expires:  {}", session.expires_at);

    println!("\n=== Submission ===\n");
    let documents = vec![
        invoice(1, "1230.00"),
        invoice(2, "450.50"),
        invoice(3, "99.99"),
    ];
    for doc in &documents {
        println!("  {}  {} bytes", doc.correlation_id(), doc.byte_len());
    }
    let handle = client.submit(documents).await?;
    println!("  handle:   {handle}");

    println!("\n=== Outcome ===\n");
    let reports = client.await_completion(handle, Duration::from_secs(60)).await?;
    for report in &reports {
        match report.resolution {
            Resolution::Accepted => println!(
                "  accepted  {}",
                report.record.authority_reference.as_deref().unwrap_or("?")
            ),
            Resolution::Rejected => println!(
                "  rejected  reason={}",
                report.record.reason_code.as_deref().unwrap_or("?")
            ),
            Resolution::TimedOut => println!("  still pending, poll again later"),
        }
    }

    println!("\n=== Confirmation ===\n");
    let first = reports[0].record.correlation_id;
    let artifact = client.fetch_confirmation(first).await?.require_valid()?;
    println!("  invoice:  {}", artifact.correlation_id);
    println!("  verified: {:?}", artifact.verification);
    println!("  document: {} bytes of signed UPO XML", artifact.document.len());

    client.logout().await?;
    println!("\nSession revoked.");
    Ok(())
}
