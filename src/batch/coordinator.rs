use std::sync::Arc;

use tracing::{debug, info};

use crate::jobs::{BatchItem, JobId, JobRegistry, RegistryError};
use crate::worker::{TaskEnvelope, WorkerPool};

/// Starts and cancels batches on top of the registry and the shared pool
pub struct BatchCoordinator {
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
}

impl BatchCoordinator {
    pub fn new(registry: Arc<JobRegistry>, pool: Arc<WorkerPool>) -> Self {
        Self { registry, pool }
    }

    /// Create the batch and queue its children in item order.
    ///
    /// Children compete FIFO with every other queued job; an empty batch is
    /// already completed when this returns.
    pub fn start(&self, items: Vec<BatchItem>, quality: String) -> Result<JobId, RegistryError> {
        let (batch_id, child_ids) = self.registry.create_batch(quality.clone(), items.clone())?;

        for (child_id, item) in child_ids.iter().zip(items) {
            self.pool.submit(TaskEnvelope::new(
                *child_id,
                item.url,
                quality.clone(),
                item.title,
            ));
        }

        info!(
            batch_id = %batch_id,
            children = child_ids.len(),
            quality = %quality,
            "Batch started"
        );
        Ok(batch_id)
    }

    /// Cancel every child that has not finished yet.
    ///
    /// Returns how many children were cancelled. The batch itself completes
    /// through the normal roll-up once its last child is terminal.
    pub fn cancel(&self, batch_id: JobId) -> Result<usize, RegistryError> {
        let mut cancelled = 0;
        for child_id in self.registry.children(batch_id)? {
            match self.pool.cancel(child_id) {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                // Evicted between listing and cancelling
                Err(RegistryError::JobNotFound(_)) => {
                    debug!(batch_id = %batch_id, job_id = %child_id, "Child already gone");
                }
                Err(e) => return Err(e),
            }
        }

        info!(batch_id = %batch_id, cancelled, "Batch cancelled");
        Ok(cancelled)
    }
}
