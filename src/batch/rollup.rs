//! Aggregation of child outcomes into batch state.
//!
//! These methods run inside the registry's critical section; the events they
//! return are published by the registry before the lock is released.

use chrono::{DateTime, Utc};

use crate::events::{BatchPosition, ProgressEvent};
use crate::jobs::{BatchJob, FailedChild, JobId, JobState};

/// Terminal result of one child, as seen by its batch
#[derive(Debug, Clone)]
pub(crate) struct ChildOutcome {
    pub index: usize,
    pub job_id: JobId,
    pub title: Option<String>,
    /// Failure message; `None` on success
    pub failure: Option<String>,
}

impl BatchJob {
    pub(crate) fn new(
        id: JobId,
        quality: String,
        child_job_ids: Vec<JobId>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_count = child_job_ids.len();
        let state = if total_count == 0 {
            JobState::Completed
        } else {
            JobState::Pending
        };

        Self {
            id,
            quality,
            state,
            child_job_ids,
            current_index: 0,
            total_count,
            progress_percent: if total_count == 0 { 100.0 } else { 0.0 },
            error_count: 0,
            failed_children: Vec::new(),
            current_title: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A child left `pending` or learned its title
    pub(crate) fn mark_child_active(&mut self, title: Option<&str>, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }
        if self.state == JobState::Pending {
            self.state = JobState::Downloading;
        }
        if let Some(title) = title {
            self.current_title = Some(title.to_string());
        }
        self.updated_at = now;
    }

    /// Fold one terminal child into the batch, returning the events to publish
    /// in order: `item_complete`, batch `progress`, and `complete` once every
    /// child is terminal.
    pub(crate) fn record_child_outcome(
        &mut self,
        outcome: ChildOutcome,
        now: DateTime<Utc>,
    ) -> Vec<ProgressEvent> {
        if self.state.is_terminal() || self.current_index >= self.total_count {
            return Vec::new();
        }

        if self.state == JobState::Pending {
            self.state = JobState::Downloading;
        }

        self.current_index += 1;
        self.progress_percent = self.current_index as f64 / self.total_count as f64 * 100.0;
        if outcome.title.is_some() {
            self.current_title = outcome.title.clone();
        }

        let success = outcome.failure.is_none();
        if let Some(message) = outcome.failure {
            self.error_count += 1;
            self.failed_children.push(FailedChild {
                index: outcome.index,
                job_id: outcome.job_id,
                title: outcome.title.clone(),
                message,
            });
        }
        self.updated_at = now;

        let mut events = vec![
            ProgressEvent::ItemComplete {
                batch_id: self.id,
                index: outcome.index,
                job_id: outcome.job_id,
                success,
                title: outcome.title,
            },
            ProgressEvent::Progress {
                id: self.id,
                percent: self.progress_percent,
                speed: None,
                parent: None,
                batch: Some(self.position()),
            },
        ];

        if self.current_index == self.total_count {
            self.state = JobState::Completed;
            events.push(ProgressEvent::Complete {
                id: self.id,
                filename: None,
                error_count: Some(self.error_count),
            });
        }

        events
    }

    pub fn position(&self) -> BatchPosition {
        BatchPosition {
            current_index: self.current_index,
            total_count: self.total_count,
            current_title: self.current_title.clone(),
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.current_index - self.error_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(n: usize) -> BatchJob {
        let children = (0..n).map(|_| JobId::new()).collect();
        BatchJob::new(JobId::new(), "best".to_string(), children, Utc::now())
    }

    fn outcome(batch: &BatchJob, index: usize, failure: Option<&str>) -> ChildOutcome {
        ChildOutcome {
            index,
            job_id: batch.child_job_ids[index],
            title: Some(format!("Video {}", index)),
            failure: failure.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_batch_starts_completed() {
        let batch = batch_of(0);
        assert_eq!(batch.state, JobState::Completed);
        assert_eq!(batch.total_count, 0);
        assert_eq!(batch.error_count, 0);
    }

    #[test]
    fn test_rollup_event_order() {
        let mut batch = batch_of(2);

        let first = outcome(&batch, 1, None);
        let events = batch.record_child_outcome(first, Utc::now());
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ProgressEvent::ItemComplete { index: 1, success: true, .. }
        ));
        match &events[1] {
            ProgressEvent::Progress { percent, batch: Some(position), .. } => {
                assert_eq!(*percent, 50.0);
                assert_eq!(position.current_index, 1);
                assert_eq!(position.total_count, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(batch.state, JobState::Downloading);

        let second = outcome(&batch, 0, Some("HTTP 404"));
        let events = batch.record_child_outcome(second, Utc::now());
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[2],
            ProgressEvent::Complete { error_count: Some(1), .. }
        ));
        assert_eq!(batch.state, JobState::Completed);
        assert_eq!(batch.failed_children.len(), 1);
        assert_eq!(batch.failed_children[0].index, 0);
        assert_eq!(batch.succeeded_count(), 1);
    }

    #[test]
    fn test_no_rollup_after_completion() {
        let mut batch = batch_of(1);
        let only = outcome(&batch, 0, None);
        batch.record_child_outcome(only.clone(), Utc::now());

        assert!(batch.record_child_outcome(only, Utc::now()).is_empty());
        assert_eq!(batch.current_index, 1);
    }

    #[test]
    fn test_mark_child_active() {
        let mut batch = batch_of(3);
        batch.mark_child_active(None, Utc::now());
        assert_eq!(batch.state, JobState::Downloading);
        assert!(batch.current_title.is_none());

        batch.mark_child_active(Some("Intro"), Utc::now());
        assert_eq!(batch.current_title.as_deref(), Some("Intro"));
    }
}
