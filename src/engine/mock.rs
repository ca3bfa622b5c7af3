//! Scripted in-process engine.
//!
//! Every URL can be given its own metadata, listing and outcome. Unscripted
//! URLs resolve to a placeholder and download successfully.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    CollectionEntry, DownloadOutput, DownloadRequest, EngineError, MediaEngine, MediaInfo,
    ProgressSink, TransferProgress,
};

const MOCK_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed { filename: String },
    Fail(EngineError),
    /// Never returns; only cancellation or timeout end the download
    Hang,
}

#[derive(Debug)]
pub struct MockEngine {
    media: HashMap<String, MediaInfo>,
    resolve_errors: HashMap<String, EngineError>,
    collections: HashMap<String, Vec<CollectionEntry>>,
    outcomes: HashMap<String, MockOutcome>,
    progress_steps: u64,
    step_delay: Duration,
    abortable: bool,
    active: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            media: HashMap::new(),
            resolve_errors: HashMap::new(),
            collections: HashMap::new(),
            outcomes: HashMap::new(),
            progress_steps: 4,
            step_delay: Duration::from_millis(10),
            abortable: true,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_media(mut self, url: impl Into<String>, info: MediaInfo) -> Self {
        self.media.insert(url.into(), info);
        self
    }

    pub fn with_resolve_error(mut self, url: impl Into<String>, error: EngineError) -> Self {
        self.resolve_errors.insert(url.into(), error);
        self
    }

    pub fn with_collection(
        mut self,
        url: impl Into<String>,
        entries: Vec<CollectionEntry>,
    ) -> Self {
        self.collections.insert(url.into(), entries);
        self
    }

    pub fn with_outcome(mut self, url: impl Into<String>, outcome: MockOutcome) -> Self {
        self.outcomes.insert(url.into(), outcome);
        self
    }

    /// Progress samples reported per download and the pause before each
    pub fn with_progress(mut self, steps: u64, step_delay: Duration) -> Self {
        self.progress_steps = steps;
        self.step_delay = step_delay;
        self
    }

    /// Downloads keep running after their future would have been dropped
    pub fn non_abortable(mut self) -> Self {
        self.abortable = false;
        self
    }

    /// Downloads in flight right now
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most downloads ever in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Downloads that ran to their scripted outcome
    pub fn finished_downloads(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// URLs in the order their downloads started
    pub fn started_urls(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    fn placeholder_title(url: &str) -> String {
        url.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|tail| !tail.is_empty())
            .unwrap_or("video")
            .to_string()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, EngineError> {
        if let Some(error) = self.resolve_errors.get(url) {
            return Err(error.clone());
        }

        Ok(self.media.get(url).cloned().unwrap_or_else(|| MediaInfo {
            url: url.to_string(),
            title: Self::placeholder_title(url),
            uploader: "Unknown".to_string(),
            ..Default::default()
        }))
    }

    async fn list_collection(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<CollectionEntry>, EngineError> {
        let entries = self
            .collections
            .get(url)
            .ok_or_else(|| EngineError::Unsupported(url.to_string()))?;

        Ok(entries
            .iter()
            .take(max_items.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadOutput, EngineError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        self.started.lock().push(request.url.clone());

        let steps = self.progress_steps.max(1);
        for step in 1..=self.progress_steps {
            tokio::time::sleep(self.step_delay).await;
            sink.report(TransferProgress {
                downloaded_bytes: MOCK_TOTAL_BYTES * step / steps,
                total_bytes: Some(MOCK_TOTAL_BYTES),
                speed: Some(MOCK_TOTAL_BYTES as f64 / steps as f64),
            });
        }

        let outcome = self.outcomes.get(&request.url).cloned().unwrap_or_else(|| {
            let title = request
                .title
                .clone()
                .unwrap_or_else(|| Self::placeholder_title(&request.url));
            MockOutcome::Succeed {
                filename: format!("{}.mp4", title),
            }
        });

        let result = match outcome {
            MockOutcome::Succeed { filename } => Ok(DownloadOutput { filename }),
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Hang => std::future::pending().await,
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn supports_abort(&self) -> bool {
        self.abortable
    }
}
