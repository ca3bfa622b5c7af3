//! Job model and the registry that owns every job record
//!
//! The registry is the single writer of job state. Other components keep
//! only [`JobId`]s and ask for changes through [`JobRegistry::update`];
//! readers receive owned snapshots.

mod models;
mod registry;
mod retention;

pub use models::{
    BatchItem, BatchJob, ChildRef, FailedChild, FailureReason, Job, JobFailure, JobId, JobPatch,
    JobRequest, JobState, SingleJob, UpdateOutcome,
};
pub use registry::{JobRegistry, RegistryError};
pub use retention::{PruneStats, spawn_retention_sweeper};
