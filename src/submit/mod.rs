//! Submission pipeline: batch planning, envelope sealing and
//! transmission with rollback.

pub(crate) mod envelope;
mod pipeline;
pub(crate) mod store;

pub use pipeline::SubmissionPipeline;
