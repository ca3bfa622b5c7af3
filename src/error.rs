use std::time::Duration;

use thiserror::Error;

use crate::jobs::{JobId, RegistryError};

/// Errors surfaced by [`crate::orchestrator::Orchestrator`]
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Too many active jobs ({active}/{limit})")]
    CapacityExceeded { active: usize, limit: usize },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Failed to fetch metadata: {0}")]
    MetadataFetchFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CapacityExceeded { active, limit } => {
                OrchestratorError::CapacityExceeded { active, limit }
            }
            RegistryError::JobNotFound(id) => OrchestratorError::JobNotFound(id),
            RegistryError::NotTerminal(id) => {
                OrchestratorError::InvalidRequest(format!("job {} is still running", id))
            }
        }
    }
}
