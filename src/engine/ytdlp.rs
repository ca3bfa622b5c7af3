//! yt-dlp process adapter.
//!
//! Metadata and listings come from `--dump-single-json`. Downloads run with a
//! custom `--progress-template` so every progress line on the pipe is machine
//! readable, and `--print after_move:filepath` reports the final file.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    CollectionEntry, DownloadOutput, DownloadRequest, EngineError, MediaEngine, MediaFormat,
    MediaInfo, ProgressSink, TransferProgress,
};
use crate::config::EngineConfig;

const PROGRESS_PREFIX: &str = "reelbox-progress";
const PROGRESS_TEMPLATE: &str = concat!(
    "download:reelbox-progress",
    " %(progress.downloaded_bytes)s",
    " %(progress.total_bytes)s",
    " %(progress.total_bytes_estimate)s",
    " %(progress.speed)s",
);
/// Audio is re-encoded to AAC so the remuxed file plays everywhere
const FFMPEG_ARGS: &str = "ffmpeg:-c:v copy -c:a aac -b:a 192k";

pub struct YtDlpEngine {
    config: EngineConfig,
}

/// Classified line of yt-dlp output
#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(TransferProgress),
    Error(String),
    Other(String),
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cookies) = &self.config.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    /// Run yt-dlp to completion and parse its JSON output
    async fn dump_json(&self, args: &[String]) -> Result<Value, EngineError> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| spawn_error(&self.config.binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_error_line(&stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(EngineError::Extraction(message));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Extraction(format!("invalid yt-dlp output: {}", e)))
    }

    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let output = self.config.download_dir.join(&self.config.output_template);
        let format = &self.config.merge_output_format;

        vec![
            "-f".to_string(),
            request.quality.clone(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            "--merge-output-format".to_string(),
            format.clone(),
            "--remux-video".to_string(),
            format.clone(),
            "--postprocessor-args".to_string(),
            FFMPEG_ARGS.to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            request.url.clone(),
        ]
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo, EngineError> {
        let args = [
            "--dump-single-json",
            "--no-warnings",
            "--skip-download",
            "--no-playlist",
            url,
        ]
        .map(String::from);

        let value = self.dump_json(&args).await?;
        Ok(parse_media_info(url, &value))
    }

    async fn list_collection(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<CollectionEntry>, EngineError> {
        let mut args: Vec<String> = ["--flat-playlist", "--dump-single-json", "--no-warnings"]
            .map(String::from)
            .to_vec();
        if let Some(max) = max_items {
            args.push("--playlist-items".to_string());
            args.push(format!("1:{}", max));
        }
        args.push(url.to_string());

        let value = self.dump_json(&args).await?;
        let entries = parse_collection(&value, max_items);
        debug!(url, entries = entries.len(), "Collection listed");
        Ok(entries)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadOutput, EngineError> {
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        let args = self.download_args(request);
        info!(url = %request.url, quality = %request.quality, "Starting yt-dlp download");

        let mut child = self
            .command()
            .args(&args)
            .spawn()
            .map_err(|e| spawn_error(&self.config.binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Process("failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Process("failed to capture yt-dlp stderr".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);
        let mut filepath = None;
        let mut last_error = None;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line? {
                    Some(line) => match classify_line(&line) {
                        OutputLine::Progress(progress) => sink.report(progress),
                        OutputLine::Error(message) => last_error = Some(message),
                        OutputLine::Other(path) if !path.is_empty() => filepath = Some(path),
                        OutputLine::Other(_) => {}
                    },
                    None => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line? {
                    Some(line) => match classify_line(&line) {
                        OutputLine::Progress(progress) => sink.report(progress),
                        OutputLine::Error(message) => {
                            warn!(url = %request.url, "yt-dlp: {}", message);
                            last_error = Some(message);
                        }
                        OutputLine::Other(line) => debug!(url = %request.url, "yt-dlp: {}", line),
                    },
                    None => err_done = true,
                },
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let message = last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            return Err(EngineError::Process(message));
        }

        let filepath = filepath.ok_or_else(|| {
            EngineError::Process("yt-dlp did not report an output file".to_string())
        })?;
        let filename = Path::new(&filepath)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(filepath);

        Ok(DownloadOutput { filename })
    }
}

fn spawn_error(binary: &str, err: std::io::Error) -> EngineError {
    EngineError::Process(format!("failed to run {}: {}", binary, err))
}

fn classify_line(line: &str) -> OutputLine {
    let line = line.trim();
    if let Some(progress) = parse_progress_line(line) {
        return OutputLine::Progress(progress);
    }
    if let Some(message) = line.strip_prefix("ERROR:") {
        return OutputLine::Error(message.trim().to_string());
    }
    OutputLine::Other(line.to_string())
}

fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:"))
        .map(|message| message.trim().to_string())
}

/// Parse one `--progress-template` line; yt-dlp prints `NA` for unknown fields
fn parse_progress_line(line: &str) -> Option<TransferProgress> {
    let mut fields = line.strip_prefix(PROGRESS_PREFIX)?.split_whitespace();

    let mut next = || -> Option<Option<f64>> {
        let field = fields.next()?;
        Some(field.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0))
    };

    let downloaded = next()?;
    let total = next()?;
    let estimate = next()?;
    let speed = next()?;

    Some(TransferProgress {
        downloaded_bytes: downloaded.unwrap_or(0.0) as u64,
        total_bytes: total.or(estimate).map(|v| v as u64),
        speed,
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u64_field(value: &Value, key: &str) -> Option<u64> {
    value
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
}

fn parse_format(value: &Value) -> MediaFormat {
    MediaFormat {
        format_id: str_field(value, "format_id").unwrap_or_default(),
        ext: str_field(value, "ext").unwrap_or_default(),
        resolution: str_field(value, "resolution").unwrap_or_else(|| "audio only".to_string()),
        filesize: u64_field(value, "filesize").or_else(|| u64_field(value, "filesize_approx")),
        vcodec: str_field(value, "vcodec").unwrap_or_else(|| "none".to_string()),
        acodec: str_field(value, "acodec").unwrap_or_else(|| "none".to_string()),
        height: u64_field(value, "height").and_then(|h| u32::try_from(h).ok()),
        fps: value.get("fps").and_then(Value::as_f64),
    }
}

fn parse_media_info(url: &str, value: &Value) -> MediaInfo {
    let formats = value
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| {
            formats
                .iter()
                .map(parse_format)
                .filter(|f| f.vcodec != "none" || f.acodec != "none")
                .collect()
        })
        .unwrap_or_default();

    MediaInfo {
        url: url.to_string(),
        title: str_field(value, "title").unwrap_or_else(|| "Unknown".to_string()),
        uploader: str_field(value, "uploader").unwrap_or_else(|| "Unknown".to_string()),
        duration_secs: u64_field(value, "duration").unwrap_or(0),
        thumbnail: str_field(value, "thumbnail").unwrap_or_default(),
        formats,
    }
}

fn parse_collection(value: &Value, max_items: Option<usize>) -> Vec<CollectionEntry> {
    let Some(entries) = value.get("entries").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| !entry.is_null())
        .filter_map(|entry| {
            let url = str_field(entry, "url").or_else(|| str_field(entry, "webpage_url"))?;
            Some(CollectionEntry {
                url,
                title: str_field(entry, "title").unwrap_or_else(|| "Unknown".to_string()),
                duration_secs: u64_field(entry, "duration"),
                thumbnail: str_field(entry, "thumbnail"),
            })
        })
        .take(max_items.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_parse_progress_line() {
        let progress =
            parse_progress_line("reelbox-progress 1048576 4194304 NA 524288.5").unwrap();
        assert_eq!(progress.downloaded_bytes, 1_048_576);
        assert_eq!(progress.total_bytes, Some(4_194_304));
        assert_eq!(progress.speed, Some(524_288.5));
        assert_eq!(progress.percent(), 25.0);
    }

    #[test]
    fn test_progress_falls_back_to_estimate() {
        let progress = parse_progress_line("reelbox-progress 100 NA 400.0 NA").unwrap();
        assert_eq!(progress.total_bytes, Some(400));
        assert_eq!(progress.speed, None);

        let unknown = parse_progress_line("reelbox-progress NA NA NA NA").unwrap();
        assert_eq!(unknown.downloaded_bytes, 0);
        assert_eq!(unknown.total_bytes, None);
    }

    #[test]
    fn test_non_progress_lines() {
        assert!(parse_progress_line("[download] Destination: a.mp4").is_none());
        assert!(parse_progress_line("reelbox-progress 1 2").is_none());

        assert_eq!(
            classify_line("ERROR: [youtube] abc: Video unavailable"),
            OutputLine::Error("[youtube] abc: Video unavailable".to_string())
        );
        assert_eq!(
            classify_line("/srv/media/clip.mp4\n"),
            OutputLine::Other("/srv/media/clip.mp4".to_string())
        );
    }

    #[test]
    fn test_last_error_line() {
        let stderr = "WARNING: slow\nERROR: first\nsomething\nERROR: second\n";
        assert_eq!(last_error_line(stderr).as_deref(), Some("second"));
        assert_eq!(last_error_line("WARNING: only"), None);
    }

    #[test]
    fn test_parse_media_info_filters_formats() {
        let value = json!({
            "title": "Launch stream",
            "duration": 3723.4,
            "formats": [
                {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2"},
                {
                    "format_id": "137",
                    "ext": "mp4",
                    "vcodec": "avc1",
                    "acodec": "none",
                    "height": 1080,
                    "fps": 30.0
                }
            ]
        });

        let info = parse_media_info("https://example.com/watch?v=1", &value);
        assert_eq!(info.title, "Launch stream");
        assert_eq!(info.uploader, "Unknown");
        assert_eq!(info.duration_secs, 3723);
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[1].height, Some(1080));
    }

    #[test]
    fn test_parse_collection() {
        let value = json!({
            "entries": [
                {"url": "https://example.com/1", "title": "One", "duration": 60},
                null,
                {"webpage_url": "https://example.com/2"},
                {"title": "no url"},
                {"url": "https://example.com/3", "title": "Three"}
            ]
        });

        let entries = parse_collection(&value, None);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].title, "Unknown");
        assert_eq!(entries[1].url, "https://example.com/2");

        assert_eq!(parse_collection(&value, Some(2)).len(), 2);
        assert!(parse_collection(&json!({"title": "single"}), None).is_empty());
    }

    #[test]
    fn test_download_args() {
        let engine = YtDlpEngine::new(EngineConfig {
            download_dir: PathBuf::from("/srv/media"),
            ..Default::default()
        });
        let args = engine.download_args(&DownloadRequest {
            url: "https://example.com/v".to_string(),
            quality: "bestaudio/best".to_string(),
            title: None,
        });

        assert_eq!(args[0..2], ["-f", "bestaudio/best"]);
        assert!(args.contains(&"/srv/media/%(title)s.%(ext)s".to_string()));
        assert!(args.contains(&PROGRESS_TEMPLATE.to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
    }
}
