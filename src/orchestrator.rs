//! Public façade over the registry, worker pool and batch coordinator

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::BatchCoordinator;
use crate::config::{Config, RegistryConfig, WorkerConfig};
use crate::engine::{
    CollectionEntry, MediaEngine, QualityOption, quality::resolve_selector, quality_options,
};
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventStream};
use crate::jobs::{BatchItem, Job, JobId, JobRegistry, JobRequest};
use crate::observability::Metrics;
use crate::worker::{PoolStats, TaskEnvelope, WorkerPool};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Metadata of one video, shown before a download is started
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSummary {
    pub title: String,
    pub uploader: String,
    pub duration_secs: u64,
    pub thumbnail: String,
    pub quality_options: Vec<QualityOption>,
}

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    batches: BatchCoordinator,
    engine: Arc<dyn MediaEngine>,
    metrics: Arc<Metrics>,
    default_quality: String,
}

impl Orchestrator {
    /// Build the service and start its worker pool. Must be called from
    /// within a tokio runtime.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        workers: &WorkerConfig,
        registry: &RegistryConfig,
        default_quality: impl Into<String>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(JobRegistry::new(bus, registry));
        let metrics = Arc::new(Metrics::new());
        let pool = Arc::new(WorkerPool::new(
            registry.clone(),
            engine.clone(),
            metrics.clone(),
            workers,
        ));
        let batches = BatchCoordinator::new(registry.clone(), pool.clone());

        Self {
            registry,
            pool,
            batches,
            engine,
            metrics,
            default_quality: default_quality.into(),
        }
    }

    pub fn from_config(engine: Arc<dyn MediaEngine>, config: &Config) -> Self {
        Self::new(
            engine,
            &config.workers,
            &config.registry,
            config.defaults.quality.clone(),
        )
    }

    /// Resolve title, uploader, duration and quality options. No job is created.
    pub async fn fetch_metadata(&self, url: &str) -> Result<MediaSummary> {
        let url = validate_url(url)?;
        let info = self.engine.resolve(url).await.map_err(|e| {
            warn!(url = %url, error = %e, "Metadata lookup failed");
            OrchestratorError::MetadataFetchFailed(e.to_string())
        })?;

        Ok(MediaSummary {
            quality_options: quality_options(&info),
            title: info.title,
            uploader: info.uploader,
            duration_secs: info.duration_secs,
            thumbnail: info.thumbnail,
        })
    }

    /// List the videos of a channel or playlist
    pub async fn list_collection(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<CollectionEntry>> {
        let url = validate_url(url)?;
        let entries = self
            .engine
            .list_collection(url, max_items)
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Collection listing failed");
                OrchestratorError::MetadataFetchFailed(e.to_string())
            })?;

        info!(url = %url, entries = entries.len(), "Collection listed");
        Ok(entries)
    }

    pub fn start_single(&self, url: &str, quality: &str) -> Result<JobId> {
        let url = validate_url(url)?.to_string();
        let quality = self.selector(quality);

        let job_id = self.registry.create(JobRequest {
            url: url.clone(),
            quality: quality.clone(),
            title: None,
        })?;
        self.pool.submit(TaskEnvelope::new(job_id, url, quality, None));
        self.metrics.job_accepted();
        Ok(job_id)
    }

    pub fn start_batch(&self, urls: Vec<String>, quality: &str) -> Result<JobId> {
        self.start_batch_items(urls.into_iter().map(BatchItem::new).collect(), quality)
    }

    /// Start a batch whose items may carry already-known titles
    pub fn start_batch_items(&self, items: Vec<BatchItem>, quality: &str) -> Result<JobId> {
        let items = items
            .into_iter()
            .map(|item| -> Result<BatchItem> {
                Ok(BatchItem {
                    url: validate_url(&item.url)?.to_string(),
                    title: item.title.filter(|title| !title.trim().is_empty()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let batch_id = self.batches.start(items, self.selector(quality))?;
        self.metrics.batch_accepted();
        Ok(batch_id)
    }

    /// List a channel or playlist and download its entries as one batch
    pub async fn start_collection(
        &self,
        url: &str,
        quality: &str,
        max_items: Option<usize>,
    ) -> Result<JobId> {
        let items = self
            .list_collection(url, max_items)
            .await?
            .into_iter()
            .map(|entry| BatchItem {
                url: entry.url,
                title: Some(entry.title),
            })
            .collect();
        self.start_batch_items(items, quality)
    }

    pub fn get_status(&self, id: JobId) -> Result<Job> {
        Ok(self.registry.get(id)?)
    }

    pub fn list(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn subscribe(&self) -> EventStream {
        self.registry.bus().subscribe()
    }

    /// Current jobs plus a stream of every event after that snapshot
    pub fn subscribe_with_snapshot(&self) -> (Vec<Job>, EventStream) {
        self.registry.subscribe_with_snapshot()
    }

    /// Cancel a single job or every unfinished child of a batch.
    ///
    /// Returns the number of jobs that were cancelled; 0 when everything had
    /// already finished.
    pub fn cancel(&self, id: JobId) -> Result<usize> {
        match self.registry.get(id)? {
            Job::Batch(_) => Ok(self.batches.cancel(id)?),
            Job::Single(_) => Ok(usize::from(self.pool.cancel(id)?)),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn default_quality(&self) -> &str {
        &self.default_quality
    }

    /// Stop the worker pool; running downloads are cancelled
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn selector(&self, quality: &str) -> String {
        let quality = quality.trim();
        if quality.is_empty() {
            resolve_selector(&self.default_quality)
        } else {
            resolve_selector(quality)
        }
    }
}

/// Accept non-empty http(s) URLs
pub(crate) fn validate_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(OrchestratorError::InvalidRequest("url is empty".into()));
    }

    let scheme = url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
    match scheme.as_deref() {
        Some("http") | Some("https") => Ok(url),
        _ => Err(OrchestratorError::InvalidRequest(format!(
            "unsupported url: {}",
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, MediaFormat, MediaInfo, MockEngine};

    fn orchestrator(engine: MockEngine) -> Orchestrator {
        Orchestrator::new(
            Arc::new(engine),
            &WorkerConfig {
                max_concurrent: 2,
                progress_interval_ms: 0,
                task_timeout_secs: 30,
            },
            &RegistryConfig { max_active_jobs: 10 },
            "best",
        )
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("  https://example.com/v ").unwrap(), "https://example.com/v");
        assert!(validate_url("HTTP://example.com").is_ok());
        assert!(matches!(validate_url(""), Err(OrchestratorError::InvalidRequest(_))));
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(OrchestratorError::InvalidRequest(_))
        ));
        assert!(matches!(validate_url("example.com"), Err(OrchestratorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_fetch_metadata_lists_quality_options() {
        let info = MediaInfo {
            url: "https://v/1".into(),
            title: "Talk".into(),
            uploader: "Conf".into(),
            duration_secs: 3725,
            formats: vec![MediaFormat {
                height: Some(720),
                vcodec: "avc1".into(),
                acodec: "none".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let orchestrator = orchestrator(MockEngine::new().with_media("https://v/1", info));

        let summary = orchestrator.fetch_metadata("https://v/1").await.unwrap();
        assert_eq!(summary.title, "Talk");
        assert_eq!(summary.duration_secs, 3725);
        let labels: Vec<&str> = summary.quality_options.iter().map(|o| o.label.as_str()).collect();
        assert!(labels.contains(&"720p (Video + Audio)"));
        assert!(orchestrator.list().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_metadata_failure_creates_no_job() {
        let engine = MockEngine::new()
            .with_resolve_error(
                "https://v/private",
                EngineError::Extraction("Private video".into()),
            );
        let orchestrator = orchestrator(engine);

        match orchestrator.fetch_metadata("https://v/private").await {
            Err(OrchestratorError::MetadataFetchFailed(message)) => {
                assert!(message.contains("Private video"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(orchestrator.list().is_empty());
    }

    #[tokio::test]
    async fn test_empty_quality_uses_default() {
        let engine = MockEngine::new().with_progress(0, std::time::Duration::ZERO);
        let orchestrator = orchestrator(engine);

        let id = orchestrator.start_single("https://v/a", "").unwrap();
        let job = orchestrator.get_status(id).unwrap();
        assert_eq!(job.as_single().unwrap().quality, "bestvideo+bestaudio/best");

        let id = orchestrator.start_single("https://v/b", "720p").unwrap();
        let job = orchestrator.get_status(id).unwrap();
        assert_eq!(
            job.as_single().unwrap().quality,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
    }

    #[tokio::test]
    async fn test_invalid_batch_item_rejects_whole_batch() {
        let orchestrator = orchestrator(MockEngine::new());

        let result = orchestrator.start_batch(
            vec!["https://v/a".to_string(), "not a url".to_string()],
            "best",
        );
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        assert!(orchestrator.list().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let orchestrator = orchestrator(MockEngine::new());
        let urls: Vec<String> = (0..10).map(|i| format!("https://v/{}", i)).collect();

        let result = orchestrator.start_batch(urls, "best");
        assert!(matches!(
            result,
            Err(OrchestratorError::CapacityExceeded { limit: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let orchestrator = orchestrator(MockEngine::new());
        let id = JobId::new();
        assert!(matches!(
            orchestrator.cancel(id),
            Err(OrchestratorError::JobNotFound(missing)) if missing == id
        ));
    }
}
