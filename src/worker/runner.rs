//! Task runner: executes one envelope against the engine

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TaskEnvelope;
use super::pool::PoolShared;
use super::throttle::ProgressThrottle;
use crate::engine::{DownloadOutput, ProgressSink, TransferProgress};
use crate::error::OrchestratorError;
use crate::jobs::{
    JobFailure, JobId, JobPatch, JobRegistry, JobState, RegistryError, UpdateOutcome,
};

/// Forwards throttled engine progress to the registry
pub(super) struct JobProgressSink {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    throttle: ProgressThrottle,
}

impl JobProgressSink {
    pub(super) fn new(registry: Arc<JobRegistry>, job_id: JobId, interval: Duration) -> Self {
        Self {
            registry,
            job_id,
            throttle: ProgressThrottle::new(interval),
        }
    }
}

impl ProgressSink for JobProgressSink {
    fn report(&self, progress: TransferProgress) {
        if !self.throttle.should_emit() {
            return;
        }
        let patch = JobPatch::Progress {
            percent: progress.percent(),
            speed: progress.speed,
            downloaded: progress.downloaded_bytes,
            total: progress.total_bytes,
        };
        if let Err(e) = self.registry.update(self.job_id, patch) {
            debug!(job_id = %self.job_id, error = %e, "Progress dropped");
        }
    }
}

/// Run one task to a terminal registry state.
///
/// Timeout drops the engine future. Cancellation drops it too when the engine
/// supports abort; otherwise the download is awaited and its result discarded,
/// since the job is already terminal.
pub(super) async fn run_task(
    shared: &PoolShared,
    envelope: TaskEnvelope,
    token: CancellationToken,
) {
    let job_id = envelope.job_id;
    let started = Instant::now();
    info!(job_id = %job_id, url = %envelope.request.url, "Task started");

    let work = tokio::time::timeout(shared.task_timeout, execute(shared, &envelope));
    tokio::pin!(work);

    let result = tokio::select! {
        _ = token.cancelled() => {
            if !shared.engine.supports_abort() {
                debug!(job_id = %job_id, "Engine cannot abort, waiting for the download to end");
                let _ = work.await;
            }
            Err(OrchestratorError::Cancelled)
        }
        result = &mut work => match result {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout(shared.task_timeout)),
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(output) => {
            let patch = JobPatch::Completed {
                filename: output.filename,
            };
            if applied(&shared.registry, job_id, patch) {
                shared.metrics.job_completed();
            }
            info!(job_id = %job_id, elapsed_ms, "Task completed");
        }
        Err(OrchestratorError::Cancelled) => {
            // Normally already terminal; this only covers a cancel that raced creation
            applied(&shared.registry, job_id, JobPatch::Failed(JobFailure::cancelled()));
            info!(job_id = %job_id, elapsed_ms, "Task cancelled");
        }
        Err(err) => {
            let failure = JobFailure::from(&err);
            if applied(&shared.registry, job_id, JobPatch::Failed(failure)) {
                if matches!(err, OrchestratorError::Timeout(_)) {
                    shared.metrics.job_timed_out();
                } else {
                    shared.metrics.job_failed();
                }
            }
            warn!(job_id = %job_id, elapsed_ms, error = %err, "Task failed");
        }
    }
}

async fn execute(
    shared: &PoolShared,
    envelope: &TaskEnvelope,
) -> Result<DownloadOutput, OrchestratorError> {
    let job_id = envelope.job_id;
    let registry = &shared.registry;
    let mut request = envelope.request.clone();

    if request.title.is_none() {
        advance(registry, job_id, JobPatch::State(JobState::FetchingMetadata))?;
        let info = shared
            .engine
            .resolve(&request.url)
            .await
            .map_err(|e| OrchestratorError::MetadataFetchFailed(e.to_string()))?;
        debug!(job_id = %job_id, title = %info.title, "Metadata resolved");
        advance(registry, job_id, JobPatch::Title(info.title.clone()))?;
        request.title = Some(info.title);
    }

    advance(registry, job_id, JobPatch::State(JobState::Downloading))?;

    let sink = JobProgressSink::new(registry.clone(), job_id, shared.progress_interval);
    shared
        .engine
        .download(&request, &sink)
        .await
        .map_err(|e| OrchestratorError::DownloadFailed(e.to_string()))
}

/// Apply a patch before the engine step. An ignored patch means the job was
/// cancelled meanwhile, so the step is not started.
fn advance(
    registry: &JobRegistry,
    job_id: JobId,
    patch: JobPatch,
) -> Result<(), OrchestratorError> {
    match registry.update(job_id, patch)? {
        UpdateOutcome::Applied(_) => Ok(()),
        UpdateOutcome::Ignored if registry.is_finished(job_id) => Err(OrchestratorError::Cancelled),
        UpdateOutcome::Ignored => Ok(()),
    }
}

/// Apply a terminal patch, logging instead of propagating registry errors
pub(super) fn applied(registry: &JobRegistry, job_id: JobId, patch: JobPatch) -> bool {
    match registry.update(job_id, patch) {
        Ok(outcome) => outcome.is_applied(),
        Err(RegistryError::JobNotFound(_)) => {
            warn!(job_id = %job_id, "Job vanished before its result was recorded");
            false
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Failed to record task result");
            false
        }
    }
}
