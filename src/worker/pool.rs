use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::runner;
use super::{PoolStats, TaskEnvelope};
use crate::config::WorkerConfig;
use crate::engine::MediaEngine;
use crate::jobs::{FailureReason, JobFailure, JobId, JobPatch, JobRegistry, RegistryError};
use crate::observability::Metrics;

/// Bounded-concurrency executor for download tasks
///
/// Architecture:
/// 1. Callers `submit` envelopes onto an unbounded FIFO queue (never blocks)
/// 2. A single dispatcher pops envelopes in order and waits for a slot on a
///    fair semaphore sized `max_concurrent`
/// 3. Each slot runs one task; the permit is released when the task ends,
///    so the next queued envelope starts immediately
/// 4. Jobs that became terminal while queued (cancelled) are skipped without
///    taking a slot
pub struct WorkerPool {
    queue_tx: mpsc::UnboundedSender<TaskEnvelope>,
    shared: Arc<PoolShared>,
    dispatcher: JoinHandle<()>,
}

/// State shared by the dispatcher and running tasks
pub(super) struct PoolShared {
    pub(super) registry: Arc<JobRegistry>,
    pub(super) engine: Arc<dyn MediaEngine>,
    pub(super) metrics: Arc<Metrics>,
    pub(super) progress_interval: Duration,
    pub(super) task_timeout: Duration,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl WorkerPool {
    /// Start the pool. Must be called from within a tokio runtime.
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<dyn MediaEngine>,
        metrics: Arc<Metrics>,
        config: &WorkerConfig,
    ) -> Self {
        let capacity = config.max_concurrent.max(1);
        let shared = Arc::new(PoolShared {
            registry,
            engine,
            metrics,
            progress_interval: config.progress_interval(),
            task_timeout: config.task_timeout(),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            tokens: Mutex::new(HashMap::new()),
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(shared.clone(), queue_rx));

        info!(
            capacity,
            engine = shared.engine.name(),
            task_timeout_secs = shared.task_timeout.as_secs(),
            "Worker pool started"
        );

        Self {
            queue_tx,
            shared,
            dispatcher,
        }
    }

    /// Queue a job for download
    pub fn submit(&self, envelope: TaskEnvelope) {
        let job_id = envelope.job_id;
        self.shared
            .tokens
            .lock()
            .insert(job_id, CancellationToken::new());
        self.shared.queued.fetch_add(1, Ordering::SeqCst);

        if self.shared.semaphore.is_closed() || self.queue_tx.send(envelope).is_err() {
            error!(job_id = %job_id, "Worker pool is stopped, job cannot run");
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            self.shared.tokens.lock().remove(&job_id);
            let failure = JobFailure::new(FailureReason::DownloadFailed, "worker pool is stopped");
            if runner::applied(&self.shared.registry, job_id, JobPatch::Failed(failure)) {
                self.shared.metrics.job_failed();
            }
            return;
        }

        debug!(job_id = %job_id, "Task queued");
    }

    /// Mark the job `failed{cancelled}` and stop its work.
    ///
    /// Returns false when the job had already finished. A queued job is
    /// skipped by the dispatcher; a running one has its engine future dropped
    /// or, for engines that cannot abort, its result discarded.
    pub fn cancel(&self, job_id: JobId) -> Result<bool, RegistryError> {
        let outcome = self
            .shared
            .registry
            .update(job_id, JobPatch::Failed(JobFailure::cancelled()))?;
        if !outcome.is_applied() {
            return Ok(false);
        }

        self.shared.metrics.job_cancelled();
        if let Some(token) = self.shared.tokens.lock().get(&job_id) {
            token.cancel();
        }
        info!(job_id = %job_id, "Job cancelled");
        Ok(true)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.capacity,
            active: self.shared.active.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
        }
    }

    /// Stop dispatching and cancel every queued and running task.
    ///
    /// Each unfinished job is marked `failed{cancelled}` so that no job is
    /// left pending once the pool is gone.
    pub fn shutdown(&self) {
        self.shared.semaphore.close();
        self.dispatcher.abort();

        let tokens: Vec<(JobId, CancellationToken)> = self.shared.tokens.lock().drain().collect();
        let mut cancelled = 0;
        for (job_id, token) in tokens {
            token.cancel();
            let patch = JobPatch::Failed(JobFailure::cancelled());
            if runner::applied(&self.shared.registry, job_id, patch) {
                self.shared.metrics.job_cancelled();
                cancelled += 1;
            }
        }
        self.shared.queued.store(0, Ordering::SeqCst);
        info!(cancelled, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl PoolShared {
    fn token_for(&self, job_id: JobId) -> CancellationToken {
        self.tokens
            .lock()
            .entry(job_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    fn skip(&self, job_id: JobId) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.tokens.lock().remove(&job_id);
        debug!(job_id = %job_id, "Job finished while queued, skipped");
    }
}

async fn dispatch(shared: Arc<PoolShared>, mut queue_rx: mpsc::UnboundedReceiver<TaskEnvelope>) {
    while let Some(envelope) = queue_rx.recv().await {
        let job_id = envelope.job_id;

        if shared.registry.is_finished(job_id) {
            shared.skip(job_id);
            continue;
        }

        let permit = match shared.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        // Cancelled while waiting for a slot
        if shared.registry.is_finished(job_id) {
            shared.skip(job_id);
            continue;
        }

        shared.queued.fetch_sub(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);
        let token = shared.token_for(job_id);
        let task_shared = shared.clone();

        tokio::spawn(async move {
            runner::run_task(&task_shared, envelope, token).await;
            task_shared.tokens.lock().remove(&job_id);
            task_shared.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    debug!("Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, MockOutcome};
    use crate::events::EventBus;
    use crate::jobs::{JobRequest, JobState};

    fn setup(
        engine: MockEngine,
        workers: usize,
    ) -> (Arc<JobRegistry>, Arc<MockEngine>, WorkerPool) {
        let registry = Arc::new(JobRegistry::with_capacity(Arc::new(EventBus::new()), 100));
        let engine = Arc::new(engine);
        let config = WorkerConfig {
            max_concurrent: workers,
            progress_interval_ms: 0,
            task_timeout_secs: 30,
        };
        let metrics = Arc::new(Metrics::new());
        let pool = WorkerPool::new(registry.clone(), engine.clone(), metrics, &config);
        (registry, engine, pool)
    }

    fn submit(registry: &JobRegistry, pool: &WorkerPool, url: &str) -> JobId {
        let id = registry
            .create(JobRequest {
                url: url.to_string(),
                quality: "best".to_string(),
                title: Some("known".to_string()),
            })
            .unwrap();
        pool.submit(TaskEnvelope::new(
            id,
            url.to_string(),
            "best".to_string(),
            Some("known".to_string()),
        ));
        id
    }

    async fn wait_finished(registry: &JobRegistry, ids: &[JobId]) {
        for _ in 0..500 {
            if ids.iter().all(|id| registry.is_finished(*id)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not finish in time");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let engine = MockEngine::new().with_progress(3, Duration::from_millis(20));
        let (registry, engine, pool) = setup(engine, 2);

        let ids: Vec<JobId> = (0..6)
            .map(|i| submit(&registry, &pool, &format!("https://example.com/{}", i)))
            .collect();
        wait_finished(&registry, &ids).await;

        assert_eq!(engine.peak_concurrency(), 2);
        assert_eq!(engine.started_urls().len(), 6);
        for id in ids {
            assert_eq!(registry.get(id).unwrap().state(), JobState::Completed);
        }
    }

    #[tokio::test]
    async fn test_fifo_start_order() {
        let engine = MockEngine::new().with_progress(1, Duration::from_millis(5));
        let (registry, engine, pool) = setup(engine, 1);

        let urls: Vec<String> = (0..4).map(|i| format!("https://example.com/{}", i)).collect();
        let ids: Vec<JobId> = urls.iter().map(|url| submit(&registry, &pool, url)).collect();
        wait_finished(&registry, &ids).await;

        assert_eq!(engine.started_urls(), urls);
    }

    #[tokio::test]
    async fn test_queued_job_cancelled_before_start_is_skipped() {
        let engine = MockEngine::new()
            .with_progress(0, Duration::ZERO)
            .with_outcome("https://example.com/slow", MockOutcome::Hang);
        let (registry, engine, pool) = setup(engine, 1);

        let slow = submit(&registry, &pool, "https://example.com/slow");
        for _ in 0..100 {
            if engine.active() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let queued = submit(&registry, &pool, "https://example.com/next");
        tokio::task::yield_now().await;

        assert!(pool.cancel(queued).unwrap());
        assert!(pool.cancel(slow).unwrap());
        assert!(!pool.cancel(slow).unwrap());

        wait_finished(&registry, &[slow, queued]).await;
        for _ in 0..100 {
            if pool.stats().active == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.started_urls(), vec!["https://example.com/slow".to_string()]);
        assert_eq!(pool.stats(), PoolStats { capacity: 1, active: 0, queued: 0 });
    }

    async fn wait_active(engine: &MockEngine, count: usize) {
        for _ in 0..100 {
            if engine.active() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine never reached {} active downloads", count);
    }

    #[tokio::test]
    async fn test_shutdown_fails_running_and_queued_jobs() {
        let engine = MockEngine::new()
            .with_progress(0, Duration::ZERO)
            .with_outcome("https://example.com/slow", MockOutcome::Hang);
        let (registry, engine, pool) = setup(engine, 1);

        let running = submit(&registry, &pool, "https://example.com/slow");
        wait_active(&engine, 1).await;
        let queued = submit(&registry, &pool, "https://example.com/next");

        pool.shutdown();

        for id in [running, queued] {
            let job = registry.get(id).unwrap();
            let job = job.as_single().unwrap();
            assert_eq!(job.state, JobState::Failed);
            assert_eq!(job.error.as_ref().unwrap().reason, FailureReason::Cancelled);
        }
        assert_eq!(pool.stats().queued, 0);

        // Submissions after shutdown fail instead of waiting forever
        let late = submit(&registry, &pool, "https://example.com/late");
        assert_eq!(registry.get(late).unwrap().state(), JobState::Failed);
        assert_eq!(engine.started_urls(), vec!["https://example.com/slow".to_string()]);
    }
}
