use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Identifier of a single job or a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Time-ordered (UUIDv7) id, never reused within a process
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    FetchingMetadata,
    Downloading,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Position in the lifecycle; transitions only move forward
    pub(crate) fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::FetchingMetadata => 1,
            JobState::Downloading => 2,
            JobState::Completed | JobState::Failed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::FetchingMetadata => "fetching_metadata",
            JobState::Downloading => "downloading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DownloadFailed,
    MetadataFetchFailed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl JobFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "Cancelled by user")
    }
}

impl From<&OrchestratorError> for JobFailure {
    fn from(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::MetadataFetchFailed(message) => {
                Self::new(FailureReason::MetadataFetchFailed, message.clone())
            }
            OrchestratorError::DownloadFailed(message) => {
                Self::new(FailureReason::DownloadFailed, message.clone())
            }
            OrchestratorError::Timeout(_) => Self::new(FailureReason::Timeout, err.to_string()),
            OrchestratorError::Cancelled => Self::cancelled(),
            other => Self::new(FailureReason::DownloadFailed, other.to_string()),
        }
    }
}

/// Position of a child job inside its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    pub batch_id: JobId,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleJob {
    pub id: JobId,
    pub url: String,
    pub quality: String,
    pub title: Option<String>,
    pub state: JobState,
    pub progress_percent: f64,
    pub speed: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub result_filename: Option<String>,
    pub error: Option<JobFailure>,
    pub parent: Option<ChildRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Failed child as recorded on its batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedChild {
    pub index: usize,
    pub job_id: JobId,
    pub title: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub quality: String,
    pub state: JobState,
    pub child_job_ids: Vec<JobId>,
    /// Number of children that reached a terminal state
    pub current_index: usize,
    pub total_count: usize,
    pub progress_percent: f64,
    pub error_count: usize,
    pub failed_children: Vec<FailedChild>,
    pub current_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Single(SingleJob),
    Batch(BatchJob),
}

impl Job {
    pub fn id(&self) -> JobId {
        match self {
            Job::Single(job) => job.id,
            Job::Batch(batch) => batch.id,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Job::Single(job) => job.state,
            Job::Batch(batch) => batch.state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Job::Single(job) => job.updated_at,
            Job::Batch(batch) => batch.updated_at,
        }
    }

    pub fn parent(&self) -> Option<ChildRef> {
        match self {
            Job::Single(job) => job.parent,
            Job::Batch(_) => None,
        }
    }

    pub fn as_single(&self) -> Option<&SingleJob> {
        match self {
            Job::Single(job) => Some(job),
            Job::Batch(_) => None,
        }
    }

    pub fn as_batch(&self) -> Option<&BatchJob> {
        match self {
            Job::Batch(batch) => Some(batch),
            Job::Single(_) => None,
        }
    }
}

/// Parameters of one video to download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub quality: String,
    /// Already-known title; metadata lookup is skipped when present
    #[serde(default)]
    pub title: Option<String>,
}

/// One entry of a batch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl BatchItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }
}

/// Mutation requested against a single job
#[derive(Debug, Clone, PartialEq)]
pub enum JobPatch {
    Title(String),
    /// Non-terminal state; use `Completed`/`Failed` to finish a job
    State(JobState),
    Progress {
        percent: f64,
        speed: Option<f64>,
        downloaded: u64,
        total: Option<u64>,
    },
    Completed {
        filename: String,
    },
    Failed(JobFailure),
}

impl JobPatch {
    pub fn name(&self) -> &'static str {
        match self {
            JobPatch::Title(_) => "title",
            JobPatch::State(_) => "state",
            JobPatch::Progress { .. } => "progress",
            JobPatch::Completed { .. } => "completed",
            JobPatch::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Applied(Job),
    Ignored,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_id_display_roundtrips_through_parse() {
        let id = JobId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_job_ids_are_time_ordered() {
        let first = JobId::new();
        let second = JobId::new();
        assert!(first < second);
    }

    #[test]
    fn test_state_ranks_move_forward() {
        assert!(JobState::Pending.rank() < JobState::FetchingMetadata.rank());
        assert!(JobState::FetchingMetadata.rank() < JobState::Downloading.rank());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Downloading.is_terminal());
        assert_eq!(JobState::FetchingMetadata.to_string(), "fetching_metadata");
    }

    #[test]
    fn test_failure_from_orchestrator_error() {
        let failure = JobFailure::from(&OrchestratorError::Timeout(Duration::from_secs(5)));
        assert_eq!(failure.reason, FailureReason::Timeout);

        let failure = JobFailure::from(&OrchestratorError::DownloadFailed("HTTP 403".into()));
        assert_eq!(failure.reason, FailureReason::DownloadFailed);
        assert!(failure.message.contains("HTTP 403"));
    }
}
