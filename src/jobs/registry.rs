use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{
    BatchItem, ChildRef, Job, JobId, JobPatch, JobRequest, JobState, SingleJob, UpdateOutcome,
};
use crate::batch::rollup::ChildOutcome;
use crate::config::RegistryConfig;
use crate::events::{EventBus, EventStream, ProgressEvent};
use crate::jobs::BatchJob;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Too many active jobs ({active}/{limit})")]
    CapacityExceeded { active: usize, limit: usize },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} has not finished")]
    NotTerminal(JobId),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Authoritative in-memory store of job state
///
/// All mutation goes through [`JobRegistry::update`]. Events produced by a
/// mutation are published on the bus before the lock is released, so for any
/// job the event order equals the mutation order and nothing is published
/// after its terminal event.
pub struct JobRegistry {
    pub(super) inner: Mutex<RegistryInner>,
    bus: Arc<EventBus>,
    max_active_jobs: usize,
}

#[derive(Default)]
pub(super) struct RegistryInner {
    pub(super) jobs: HashMap<JobId, Job>,
    /// Creation order
    pub(super) order: Vec<JobId>,
    /// Non-terminal jobs, batches included
    pub(super) active: usize,
}

/// Effect of a child patch on its batch
enum ChildChange {
    Active(Option<String>),
    Finished(ChildOutcome),
}

impl JobRegistry {
    pub fn new(bus: Arc<EventBus>, config: &RegistryConfig) -> Self {
        Self::with_capacity(bus, config.max_active_jobs)
    }

    pub fn with_capacity(bus: Arc<EventBus>, max_active_jobs: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            bus,
            max_active_jobs,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Allocate a pending single job
    pub fn create(&self, request: JobRequest) -> Result<JobId> {
        let mut inner = self.inner.lock();
        self.check_capacity(&inner, 1)?;

        let id = JobId::new();
        let job = new_single(id, request.url, request.quality, request.title, None);
        info!(job_id = %id, url = %job.url, "Job created");

        inner.insert(Job::Single(job));
        inner.active += 1;
        Ok(id)
    }

    /// Allocate a batch and its children in one step.
    ///
    /// Children share the batch quality and keep the order of `items`. An empty
    /// batch is created completed and its `complete` event is published here.
    pub fn create_batch(
        &self,
        quality: String,
        items: Vec<BatchItem>,
    ) -> Result<(JobId, Vec<JobId>)> {
        let mut inner = self.inner.lock();
        self.check_capacity(&inner, 1 + items.len())?;

        let batch_id = JobId::new();
        let child_ids: Vec<JobId> = items.iter().map(|_| JobId::new()).collect();

        let batch = BatchJob::new(batch_id, quality.clone(), child_ids.clone(), Utc::now());
        let empty = batch.state.is_terminal();
        inner.insert(Job::Batch(batch));

        for (index, (item, id)) in items.into_iter().zip(&child_ids).enumerate() {
            let parent = ChildRef { batch_id, index };
            inner.insert(Job::Single(new_single(
                *id,
                item.url,
                quality.clone(),
                item.title,
                Some(parent),
            )));
        }
        inner.active += child_ids.len();

        info!(batch_id = %batch_id, items = child_ids.len(), "Batch created");

        if empty {
            self.bus.publish(ProgressEvent::Complete {
                id: batch_id,
                filename: None,
                error_count: Some(0),
            });
        } else {
            inner.active += 1;
        }

        Ok((batch_id, child_ids))
    }

    /// Atomically apply a patch to a single job and publish the resulting events
    pub fn update(&self, id: JobId, patch: JobPatch) -> Result<UpdateOutcome> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Utc::now();
        let patch_name = patch.name();

        let job = match inner.jobs.get_mut(&id) {
            Some(Job::Single(job)) => job,
            Some(Job::Batch(_)) => {
                debug!(
                    batch_id = %id,
                    patch = patch_name,
                    "Batch state follows its children, patch ignored"
                );
                return Ok(UpdateOutcome::Ignored);
            }
            None => {
                warn!(job_id = %id, patch = patch_name, "Update for unknown job");
                return Err(RegistryError::JobNotFound(id));
            }
        };

        if job.state.is_terminal() {
            debug!(
                job_id = %id,
                state = %job.state,
                patch = patch_name,
                "Job already finished, patch ignored"
            );
            return Ok(UpdateOutcome::Ignored);
        }

        let mut events = Vec::new();
        let mut change = None;

        match patch {
            JobPatch::Title(title) => {
                if job.parent.is_some() && job.state != JobState::Pending {
                    change = Some(ChildChange::Active(Some(title.clone())));
                }
                job.title = Some(title);
            }
            JobPatch::State(state) => {
                if state.is_terminal() {
                    warn!(
                        job_id = %id,
                        to = %state,
                        "Terminal states are set by completion patches"
                    );
                    return Ok(UpdateOutcome::Ignored);
                }
                if state.rank() <= job.state.rank() {
                    if state != job.state {
                        warn!(
                            job_id = %id,
                            from = %job.state,
                            to = %state,
                            "Backward state transition ignored"
                        );
                    }
                    return Ok(UpdateOutcome::Ignored);
                }
                if job.parent.is_some() {
                    change = Some(ChildChange::Active(job.title.clone()));
                }
                debug!(job_id = %id, from = %job.state, to = %state, "Job state changed");
                job.state = state;
            }
            JobPatch::Progress {
                percent,
                speed,
                downloaded,
                total,
            } => {
                if percent.is_finite() {
                    job.progress_percent = job.progress_percent.max(percent.clamp(0.0, 100.0));
                }
                job.speed = speed;
                job.downloaded_bytes = downloaded;
                if total.is_some() {
                    job.total_bytes = total;
                }
                events.push(ProgressEvent::Progress {
                    id,
                    percent: job.progress_percent,
                    speed,
                    parent: job.parent,
                    batch: None,
                });
            }
            JobPatch::Completed { filename } => {
                job.state = JobState::Completed;
                job.progress_percent = 100.0;
                job.speed = None;
                job.result_filename = Some(filename.clone());
                info!(job_id = %id, filename = %filename, "Job completed");
                events.push(ProgressEvent::Complete {
                    id,
                    filename: Some(filename),
                    error_count: None,
                });
                change = job.parent.map(|parent| {
                    ChildChange::Finished(ChildOutcome {
                        index: parent.index,
                        job_id: id,
                        title: job.title.clone(),
                        failure: None,
                    })
                });
            }
            JobPatch::Failed(failure) => {
                job.state = JobState::Failed;
                job.speed = None;
                info!(
                    job_id = %id,
                    reason = ?failure.reason,
                    message = %failure.message,
                    "Job failed"
                );
                events.push(ProgressEvent::Error {
                    id,
                    reason: failure.reason,
                    message: failure.message.clone(),
                });
                change = job.parent.map(|parent| {
                    ChildChange::Finished(ChildOutcome {
                        index: parent.index,
                        job_id: id,
                        title: job.title.clone(),
                        failure: Some(failure.message.clone()),
                    })
                });
                job.error = Some(failure);
            }
        }

        job.updated_at = now;
        let finished = job.state.is_terminal();
        let parent = job.parent;
        let snapshot = Job::Single(job.clone());

        if finished {
            inner.active = inner.active.saturating_sub(1);
        }

        if let (Some(parent), Some(change)) = (parent, change) {
            if let Some(Job::Batch(batch)) = inner.jobs.get_mut(&parent.batch_id) {
                match change {
                    ChildChange::Active(title) => batch.mark_child_active(title.as_deref(), now),
                    ChildChange::Finished(outcome) => {
                        events.extend(batch.record_child_outcome(outcome, now));
                        if batch.state.is_terminal() {
                            info!(
                                batch_id = %batch.id,
                                total = batch.total_count,
                                errors = batch.error_count,
                                "Batch completed"
                            );
                            inner.active = inner.active.saturating_sub(1);
                        }
                    }
                }
            }
        }

        for event in events {
            self.bus.publish(event);
        }

        Ok(UpdateOutcome::Applied(snapshot))
    }

    /// Owned snapshot of one job
    pub fn get(&self, id: JobId) -> Result<Job> {
        self.inner
            .lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(RegistryError::JobNotFound(id))
    }

    /// All jobs in creation order
    pub fn list(&self) -> Vec<Job> {
        self.inner.lock().snapshot()
    }

    /// Subscribe to the bus and snapshot every job under the same lock.
    ///
    /// The first event on the returned stream is the first mutation after
    /// the snapshot.
    pub fn subscribe_with_snapshot(&self) -> (Vec<Job>, EventStream) {
        let inner = self.inner.lock();
        let stream = self.bus.subscribe();
        (inner.snapshot(), stream)
    }

    /// True when the job finished or no longer exists
    pub fn is_finished(&self, id: JobId) -> bool {
        self.inner
            .lock()
            .jobs
            .get(&id)
            .is_none_or(|job| job.is_terminal())
    }

    pub fn children(&self, batch_id: JobId) -> Result<Vec<JobId>> {
        match self.inner.lock().jobs.get(&batch_id) {
            Some(Job::Batch(batch)) => Ok(batch.child_job_ids.clone()),
            Some(Job::Single(_)) => Ok(Vec::new()),
            None => Err(RegistryError::JobNotFound(batch_id)),
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_capacity(&self, inner: &RegistryInner, needed: usize) -> Result<()> {
        if inner.active + needed > self.max_active_jobs {
            warn!(
                active = inner.active,
                needed,
                limit = self.max_active_jobs,
                "Registry at capacity"
            );
            return Err(RegistryError::CapacityExceeded {
                active: inner.active,
                limit: self.max_active_jobs,
            });
        }
        Ok(())
    }
}

impl RegistryInner {
    fn insert(&mut self, job: Job) {
        let id = job.id();
        self.order.push(id);
        self.jobs.insert(id, job);
    }

    fn snapshot(&self) -> Vec<Job> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect()
    }
}

fn new_single(
    id: JobId,
    url: String,
    quality: String,
    title: Option<String>,
    parent: Option<ChildRef>,
) -> SingleJob {
    let now = Utc::now();
    SingleJob {
        id,
        url,
        quality,
        title,
        state: JobState::Pending,
        progress_percent: 0.0,
        speed: None,
        downloaded_bytes: 0,
        total_bytes: None,
        result_filename: None,
        error: None,
        parent,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{FailureReason, JobFailure};

    fn registry(capacity: usize) -> (JobRegistry, EventStream) {
        let bus = Arc::new(EventBus::new());
        let stream = bus.subscribe();
        (JobRegistry::with_capacity(bus, capacity), stream)
    }

    fn request(url: &str) -> JobRequest {
        JobRequest {
            url: url.to_string(),
            quality: "best".to_string(),
            title: None,
        }
    }

    fn progress(percent: f64) -> JobPatch {
        JobPatch::Progress {
            percent,
            speed: Some(1024.0),
            downloaded: 0,
            total: None,
        }
    }

    fn drain(stream: &mut EventStream) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| stream.try_recv()).collect()
    }

    #[test]
    fn test_create_starts_pending() {
        let (registry, _events) = registry(10);
        let id = registry.create(request("https://example.com/a")).unwrap();

        let job = registry.get(id).unwrap();
        let single = job.as_single().unwrap();
        assert_eq!(single.state, JobState::Pending);
        assert_eq!(single.progress_percent, 0.0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_capacity_counts_non_terminal_jobs() {
        let (registry, _events) = registry(2);
        let first = registry.create(request("https://example.com/1")).unwrap();
        registry.create(request("https://example.com/2")).unwrap();

        assert!(matches!(
            registry.create(request("https://example.com/3")),
            Err(RegistryError::CapacityExceeded { active: 2, limit: 2 })
        ));

        registry
            .update(first, JobPatch::Completed { filename: "1.mp4".into() })
            .unwrap();
        assert!(registry.create(request("https://example.com/3")).is_ok());
    }

    #[test]
    fn test_batch_capacity_includes_batch_itself() {
        let (registry, _events) = registry(3);
        let items = vec![
            BatchItem::new("https://a"),
            BatchItem::new("https://b"),
            BatchItem::new("https://c"),
        ];
        assert!(registry.create_batch("best".into(), items).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_progress_is_clamped_monotonic() {
        let (registry, mut events) = registry(10);
        let id = registry.create(request("https://example.com/a")).unwrap();
        registry.update(id, JobPatch::State(JobState::Downloading)).unwrap();

        registry.update(id, progress(40.0)).unwrap();
        registry.update(id, progress(25.0)).unwrap();
        registry.update(id, progress(140.0)).unwrap();

        let percents: Vec<f64> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![40.0, 40.0, 100.0]);
    }

    #[test]
    fn test_terminal_job_ignores_patches() {
        let (registry, mut events) = registry(10);
        let id = registry.create(request("https://example.com/a")).unwrap();
        registry
            .update(
                id,
                JobPatch::Failed(JobFailure::new(FailureReason::DownloadFailed, "HTTP 500")),
            )
            .unwrap();

        let outcome = registry.update(id, progress(50.0)).unwrap();
        assert!(!outcome.is_applied());
        let outcome = registry
            .update(id, JobPatch::Completed { filename: "late.mp4".into() })
            .unwrap();
        assert!(!outcome.is_applied());

        let emitted = drain(&mut events);
        assert_eq!(emitted.len(), 1);
        assert!(matches!(emitted[0], ProgressEvent::Error { .. }));

        let job = registry.get(id).unwrap();
        let single = job.as_single().unwrap();
        assert!(single.result_filename.is_none());
        assert_eq!(single.error.as_ref().unwrap().message, "HTTP 500");
    }

    #[test]
    fn test_backward_transition_ignored() {
        let (registry, _events) = registry(10);
        let id = registry.create(request("https://example.com/a")).unwrap();
        registry.update(id, JobPatch::State(JobState::Downloading)).unwrap();

        let outcome = registry
            .update(id, JobPatch::State(JobState::FetchingMetadata))
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(registry.get(id).unwrap().state(), JobState::Downloading);

        let outcome = registry.update(id, JobPatch::State(JobState::Completed)).unwrap();
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_unknown_job() {
        let (registry, _events) = registry(10);
        let missing = JobId::new();
        assert!(matches!(
            registry.update(missing, progress(1.0)),
            Err(RegistryError::JobNotFound(id)) if id == missing
        ));
        assert!(registry.get(missing).is_err());
        assert!(registry.is_finished(missing));
    }

    #[test]
    fn test_empty_batch_completes_immediately() {
        let (registry, mut events) = registry(10);
        let (batch_id, children) = registry.create_batch("best".into(), Vec::new()).unwrap();

        assert!(children.is_empty());
        assert_eq!(registry.get(batch_id).unwrap().state(), JobState::Completed);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(
            drain(&mut events),
            vec![ProgressEvent::Complete {
                id: batch_id,
                filename: None,
                error_count: Some(0),
            }]
        );
    }

    #[test]
    fn test_child_outcomes_roll_up() {
        let (registry, mut events) = registry(10);
        let items = vec![BatchItem::new("https://a"), BatchItem::new("https://b")];
        let (batch_id, children) = registry.create_batch("720p".into(), items).unwrap();
        assert_eq!(registry.active_count(), 3);

        registry.update(children[0], JobPatch::State(JobState::Downloading)).unwrap();
        assert_eq!(registry.get(batch_id).unwrap().state(), JobState::Downloading);

        registry
            .update(
                children[1],
                JobPatch::Failed(JobFailure::new(FailureReason::DownloadFailed, "gone")),
            )
            .unwrap();
        registry
            .update(children[0], JobPatch::Completed { filename: "a.mp4".into() })
            .unwrap();

        let kinds: Vec<&str> = drain(&mut events).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "error",
                "item_complete",
                "progress",
                "complete",
                "item_complete",
                "progress",
                "complete",
            ]
        );

        let job = registry.get(batch_id).unwrap();
        let batch = job.as_batch().unwrap();
        assert_eq!(batch.state, JobState::Completed);
        assert_eq!(batch.error_count, 1);
        assert_eq!(batch.failed_children[0].index, 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_snapshot_then_live_events() {
        let (registry, _events) = registry(10);
        let id = registry.create(request("https://example.com/a")).unwrap();

        let (snapshot, mut stream) = registry.subscribe_with_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(stream.try_recv().is_none());

        registry.update(id, progress(10.0)).unwrap();
        assert!(matches!(stream.try_recv(), Some(ProgressEvent::Progress { .. })));
    }

    #[test]
    fn test_list_keeps_creation_order() {
        let (registry, _events) = registry(10);
        let a = registry.create(request("https://example.com/a")).unwrap();
        let b = registry.create(request("https://example.com/b")).unwrap();

        let ids: Vec<JobId> = registry.list().iter().map(Job::id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
