//! Request and response bodies of the HTTP API.
//!
//! Job and event payloads are the domain types themselves
//! ([`crate::jobs::Job`], [`crate::events::ProgressEvent`]); only the
//! envelopes around them live here.

use serde::{Deserialize, Serialize};

use crate::engine::{CollectionEntry, QualityOption};
use crate::humanize::format_duration;
use crate::jobs::{BatchItem, Job, JobId};
use crate::observability::MetricsSnapshot;
use crate::orchestrator::MediaSummary;
use crate::worker::PoolStats;

#[derive(Debug, Deserialize, Clone)]
pub struct InfoRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InfoResponse {
    pub title: String,
    pub uploader: String,
    /// `H:MM:SS` or `M:SS`
    pub duration: String,
    pub duration_secs: u64,
    pub thumbnail: String,
    pub quality_options: Vec<QualityOption>,
}

impl From<MediaSummary> for InfoResponse {
    fn from(summary: MediaSummary) -> Self {
        Self {
            duration: format_duration(summary.duration_secs),
            title: summary.title,
            uploader: summary.uploader,
            duration_secs: summary.duration_secs,
            thumbnail: summary.thumbnail,
            quality_options: summary.quality_options,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionRequest {
    pub url: String,
    #[serde(default)]
    pub max_videos: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionVideo {
    pub url: String,
    pub title: String,
    pub duration: Option<String>,
    pub thumbnail: Option<String>,
}

impl From<CollectionEntry> for CollectionVideo {
    fn from(entry: CollectionEntry) -> Self {
        Self {
            url: entry.url,
            title: entry.title,
            duration: entry.duration_secs.map(format_duration),
            thumbnail: entry.thumbnail,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionResponse {
    pub count: usize,
    pub videos: Vec<CollectionVideo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartJobRequest {
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartBatchRequest {
    pub videos: Vec<BatchItem>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: JobId,
    /// Number of downloads the job fans out to
    pub items: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancelled: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<Job>,
}

/// First frame on every event socket
#[derive(Debug, Serialize, Clone)]
pub struct SnapshotFrame {
    pub kind: &'static str,
    pub jobs: Vec<Job>,
}

impl SnapshotFrame {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            kind: "snapshot",
            jobs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pool: PoolStats,
    pub jobs: usize,
    pub metrics: MetricsSnapshot,
}
