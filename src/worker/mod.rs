//! Download worker pool
//!
//! Jobs are queued FIFO and run against the engine with bounded concurrency.
//! Each task turns engine callbacks into registry patches; the registry
//! publishes the resulting events.

mod pool;
mod runner;
mod throttle;

pub use pool::WorkerPool;
pub use throttle::ProgressThrottle;

use serde::Serialize;

use crate::engine::DownloadRequest;
use crate::jobs::JobId;

/// Unit of work handed to the pool
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub job_id: JobId,
    pub request: DownloadRequest,
}

impl TaskEnvelope {
    pub fn new(job_id: JobId, url: String, quality: String, title: Option<String>) -> Self {
        Self {
            job_id,
            request: DownloadRequest {
                url,
                quality,
                title,
            },
        }
    }
}

/// Point-in-time pool gauges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
}
