//! Cryptographic envelope for batch submission.
//!
//! Everything key-shaped lives behind this module: the per-batch
//! symmetric key, the taxpayer's signing credential and the
//! authority's public keys. Other modules deal in opaque blobs only.
//! Content digests are computed by [`crate::core::ContentDigest`],
//! which is available without this feature.

mod asymmetric;
mod symmetric;

pub use asymmetric::*;
pub use symmetric::*;

// Callers construct RSA keys themselves, so the crate behind the key
// types is part of the public API.
pub use rsa;
