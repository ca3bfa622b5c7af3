use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Request body limit, e.g. "1MB"
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
    /// Most videos accepted in one batch request
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,
    /// Event socket ping interval; also the deadline for one outgoing frame
    #[serde(default = "default_ws_heartbeat_secs")]
    pub ws_heartbeat_secs: u64,
}

impl ServerConfig {
    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
            max_batch_items: default_max_batch_items(),
            ws_heartbeat_secs: default_ws_heartbeat_secs(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(1024 * 1024) // 1 MB
}

fn default_max_batch_items() -> usize {
    500
}

fn default_ws_heartbeat_secs() -> u64 {
    30
}

/// Download worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Engine tasks allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum gap between two progress events of one job
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Upper bound on a single task, metadata lookup included
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            progress_interval_ms: default_progress_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_task_timeout_secs() -> u64 {
    3600
}

/// Job registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Non-terminal jobs (batches and their children included) kept at once
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
        }
    }
}

fn default_max_active_jobs() -> usize {
    1000
}

/// Retention of finished jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_secs: default_job_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_job_ttl_secs() -> u64 {
    86_400 // 1 day
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// yt-dlp engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_output_template")]
    pub output_template: String,
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,
    /// Netscape cookies file (loaded from environment, not from config file)
    #[serde(skip)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            download_dir: default_download_dir(),
            output_template: default_output_template(),
            merge_output_format: default_merge_output_format(),
            cookies_file: None,
        }
    }
}

fn default_binary() -> String {
    "yt-dlp".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_output_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

/// Request defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultsConfig {
    /// Format selector used when a request names no quality
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_max_collection_items")]
    pub max_collection_items: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            max_collection_items: default_max_collection_items(),
        }
    }
}

fn default_quality() -> String {
    "bestvideo+bestaudio/best".to_string()
}

fn default_max_collection_items() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.max_body_bytes.as_u64(), 1024 * 1024);
        assert_eq!(config.workers.max_concurrent, 3);
        assert_eq!(config.workers.progress_interval(), Duration::from_millis(500));
        assert_eq!(config.registry.max_active_jobs, 1000);
        assert_eq!(config.engine.binary, "yt-dlp");
        assert_eq!(config.defaults.quality, "bestvideo+bestaudio/best");
        assert!(config.engine.cookies_file.is_none());
    }
}
