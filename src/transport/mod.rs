//! Remote calls: wire contract, HTTP client, retry executor.

mod api;
mod http;
mod retry;

pub use api::*;
pub use http::*;
pub use retry::*;
