//! # ksef
//!
//! Client engine for KSeF, Poland's national e-invoicing system:
//! challenge-response sessions with transparent renewal, encrypted
//! batch submission with idempotent resubmission, status polling, and
//! signed confirmation (UPO) retrieval.
//!
//! Invoice documents are opaque bytes to this crate — rendering and
//! schema validation of FA(2) XML happen upstream. What the crate owns
//! is the exchange: sealing envelopes, driving retries, and tracking
//! every document to a terminal outcome.
//!
//! ## Quick Start
//!
//! ```rust
//! use ksef::core::*;
//!
//! let config = KsefConfig::for_environment(Environment::Test, Nip::parse("PL 526-025-02-74")?);
//! assert_eq!(config.base_url(), "https://ksef-test.mf.gov.pl/api");
//!
//! let documents = vec![
//!     InvoiceDocument::new(&b"<faktura>1</faktura>"[..]),
//!     InvoiceDocument::new(&b"<faktura>2</faktura>"[..]),
//! ];
//! let batches = plan_batches(documents, &config.limits)?;
//! assert_eq!(batches.len(), 1);
//! # Ok::<(), ksef::KsefError>(())
//! ```
//!
//! Submission itself is async and lives behind the `client` feature;
//! see [`KsefClient`] for the full round trip.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Identifiers, configuration, batch planning, submission records |
//! | `crypto` | Batch encryption, key wrapping, signing & verification |
//! | `client` | Async client: sessions, submission, polling, confirmations |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "crypto")]
pub mod crypto;

#[cfg(feature = "client")]
pub mod transport;

#[cfg(feature = "client")]
pub mod session;

#[cfg(feature = "client")]
pub mod submit;

#[cfg(feature = "client")]
pub mod status;

#[cfg(feature = "client")]
pub mod upo;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "client")]
pub mod stub;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;

#[cfg(feature = "client")]
pub use crate::client::{KsefClient, KsefClientBuilder};
