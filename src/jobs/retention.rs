//! Explicit removal of finished jobs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::models::{Job, JobId};
use super::registry::{JobRegistry, RegistryError, Result};
use crate::config::RetentionConfig;

/// Pruning statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    /// Top-level jobs and batches removed
    pub jobs_pruned: usize,
    /// Batch children removed along with their batch
    pub children_pruned: usize,
}

impl JobRegistry {
    /// Remove a finished job, returning every id that was dropped.
    ///
    /// A batch takes its children with it. A child can only be removed on its
    /// own once its batch has finished.
    pub fn evict(&self, id: JobId) -> Result<Vec<JobId>> {
        let mut inner = self.inner.lock();

        let job = inner.jobs.get(&id).ok_or(RegistryError::JobNotFound(id))?;
        if !job.is_terminal() {
            return Err(RegistryError::NotTerminal(id));
        }

        let removed = match job {
            Job::Batch(batch) => {
                let mut ids = Vec::with_capacity(batch.child_job_ids.len() + 1);
                ids.push(id);
                ids.extend(batch.child_job_ids.iter().copied());
                ids
            }
            Job::Single(single) => {
                if let Some(parent) = single.parent {
                    let batch_live = inner
                        .jobs
                        .get(&parent.batch_id)
                        .is_some_and(|batch| !batch.is_terminal());
                    if batch_live {
                        return Err(RegistryError::NotTerminal(parent.batch_id));
                    }
                }
                vec![id]
            }
        };

        for removed_id in &removed {
            inner.jobs.remove(removed_id);
        }
        let dropped: HashSet<&JobId> = removed.iter().collect();
        inner.order.retain(|id| !dropped.contains(id));

        debug!(job_id = %id, removed = removed.len(), "Job evicted");
        Ok(removed)
    }

    /// Evict top-level jobs that finished more than `ttl` ago
    pub fn prune_finished(&self, ttl: Duration) -> PruneStats {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return PruneStats::default();
        };
        let cutoff = Utc::now() - ttl;

        let expired: Vec<JobId> = self
            .list()
            .into_iter()
            .filter(|job| job.parent().is_none() && job.is_terminal() && job.updated_at() <= cutoff)
            .map(|job| job.id())
            .collect();

        let mut stats = PruneStats::default();
        for id in expired {
            // Raced with another eviction; nothing left to do
            if let Ok(removed) = self.evict(id) {
                stats.jobs_pruned += 1;
                stats.children_pruned += removed.len() - 1;
            }
        }

        if stats.jobs_pruned > 0 {
            info!(
                jobs = stats.jobs_pruned,
                children = stats.children_pruned,
                "Pruned finished jobs"
            );
        }
        stats
    }
}

/// Periodically prune finished jobs until the task is aborted
pub fn spawn_retention_sweeper(
    registry: Arc<JobRegistry>,
    config: &RetentionConfig,
) -> JoinHandle<()> {
    let ttl = config.job_ttl();
    let mut interval = tokio::time::interval(config.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tokio::spawn(async move {
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            registry.prune_finished(ttl);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::jobs::{BatchItem, JobPatch, JobRequest};

    fn registry() -> JobRegistry {
        JobRegistry::with_capacity(Arc::new(EventBus::new()), 100)
    }

    fn finish(registry: &JobRegistry, id: JobId) {
        registry
            .update(id, JobPatch::Completed { filename: format!("{}.mp4", id) })
            .unwrap();
    }

    fn single(registry: &JobRegistry) -> JobId {
        registry
            .create(JobRequest {
                url: "https://example.com/v".into(),
                quality: "best".into(),
                title: None,
            })
            .unwrap()
    }

    #[test]
    fn test_running_job_cannot_be_evicted() {
        let registry = registry();
        let id = single(&registry);

        assert!(matches!(registry.evict(id), Err(RegistryError::NotTerminal(_))));
        finish(&registry, id);
        assert_eq!(registry.evict(id).unwrap(), vec![id]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_batch_evicts_children() {
        let registry = registry();
        let items = vec![BatchItem::new("https://a"), BatchItem::new("https://b")];
        let (batch_id, children) = registry.create_batch("best".into(), items).unwrap();

        finish(&registry, children[0]);
        assert!(matches!(
            registry.evict(children[0]),
            Err(RegistryError::NotTerminal(id)) if id == batch_id
        ));

        finish(&registry, children[1]);
        let removed = registry.evict(batch_id).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_prune_respects_ttl() {
        let registry = registry();
        let done = single(&registry);
        let running = single(&registry);
        finish(&registry, done);

        assert_eq!(registry.prune_finished(Duration::from_secs(3600)), PruneStats::default());

        let stats = registry.prune_finished(Duration::ZERO);
        assert_eq!(stats.jobs_pruned, 1);
        assert!(registry.get(done).is_err());
        assert!(registry.get(running).is_ok());
    }

    #[tokio::test]
    async fn test_sweeper_prunes_on_interval() {
        let registry = Arc::new(registry());
        let id = single(&registry);
        finish(&registry, id);

        let config = RetentionConfig {
            job_ttl_secs: 1,
            sweep_interval_secs: 1,
        };
        let handle = spawn_retention_sweeper(registry.clone(), &config);

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(registry.get(id).is_err());
        handle.abort();
    }
}
