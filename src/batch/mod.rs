//! Batch downloads
//!
//! A batch is a parent job over an ordered list of child jobs. Children run on
//! the shared worker pool; the registry rolls their outcomes up into the batch.

mod coordinator;
pub(crate) mod rollup;

pub use coordinator::BatchCoordinator;
