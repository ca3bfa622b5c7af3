//! Extraction/download engine interface.
//!
//! The orchestration core only talks to [`MediaEngine`]. `ytdlp` drives the
//! yt-dlp binary; `mock` is a scripted engine for tests and demos.

pub mod mock;
pub mod quality;
pub mod ytdlp;

pub use mock::{MockEngine, MockOutcome};
pub use quality::{QualityOption, QualityPreset, quality_options};
pub use ytdlp::YtDlpEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported URL: {0}")]
    Unsupported(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Process(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// One downloadable format as reported by the extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: String,
    pub filesize: Option<u64>,
    pub vcodec: String,
    pub acodec: String,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: u64,
    pub thumbnail: String,
    pub formats: Vec<MediaFormat>,
}

/// Entry of a channel or playlist listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub url: String,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    /// Format selector, e.g. `bestvideo[height<=720]+bestaudio/best[height<=720]`
    pub quality: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutput {
    /// File name of the finished download, without directory
    pub filename: String,
}

/// Byte-level transfer progress
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Bytes per second
    pub speed: Option<f64>,
}

impl TransferProgress {
    /// Percent complete, 0 when the total is unknown
    pub fn percent(&self) -> f64 {
        match self.total_bytes {
            Some(total) if total > 0 => {
                (self.downloaded_bytes as f64 / total as f64 * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }
}

/// Receiver of progress callbacks during a download
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: TransferProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(TransferProgress) + Send + Sync,
{
    fn report(&self, progress: TransferProgress) {
        self(progress)
    }
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve metadata and available formats without downloading
    async fn resolve(&self, url: &str) -> Result<MediaInfo, EngineError>;

    /// List the videos of a channel or playlist, at most `max_items` of them
    async fn list_collection(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<CollectionEntry>, EngineError>;

    /// Transfer one video. Returning ends the download; progress is reported
    /// through `sink` until then.
    async fn download(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadOutput, EngineError>;

    /// Whether dropping an in-flight `download` future stops the transfer
    fn supports_abort(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percent_from_bytes() {
        let progress = TransferProgress {
            downloaded_bytes: 250,
            total_bytes: Some(1000),
            speed: None,
        };
        assert_eq!(progress.percent(), 25.0);

        let unknown = TransferProgress {
            downloaded_bytes: 250,
            total_bytes: None,
            speed: None,
        };
        assert_eq!(unknown.percent(), 0.0);

        let overshoot = TransferProgress {
            downloaded_bytes: 1200,
            total_bytes: Some(1000),
            speed: None,
        };
        assert_eq!(overshoot.percent(), 100.0);
    }

    #[test]
    fn test_closure_is_a_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |progress: TransferProgress| {
            seen.lock().unwrap().push(progress.downloaded_bytes)
        };

        let sink_ref: &dyn ProgressSink = &sink;
        sink_ref.report(TransferProgress {
            downloaded_bytes: 42,
            ..Default::default()
        });
        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }
}
