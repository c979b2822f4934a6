//! Core types for the submission engine.
//!
//! This module provides the data model shared by every feature level:
//! documents and their tracking records, taxpayer identity, client
//! configuration, batch planning and the crate error type.

mod batching;
mod config;
mod error;
mod identity;
mod types;

pub use batching::*;
pub use config::*;
pub use error::*;
pub use identity::*;
pub use types::*;
