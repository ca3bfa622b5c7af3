use super::models::Config;
use thiserror::Error;

const MAX_BODY_BYTES: u64 = 5 * 1024 * 1024; // 5 MB
const MAX_PROGRESS_INTERVAL_MS: u64 = 60_000;
const MAX_BATCH_ITEMS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workers.max_concurrent must be at least 1")]
    NoWorkers,

    #[error("{field} must be positive")]
    ZeroDuration { field: &'static str },

    #[error("workers.progress_interval_ms ({actual}) exceeds limit of {limit}ms")]
    ProgressIntervalTooLong { actual: u64, limit: u64 },

    #[error("registry.max_active_jobs must be at least 1")]
    NoRegistryCapacity,

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("server.max_body_bytes ({actual}) exceeds limit of 5MB ({limit})")]
    BodySizeExceedsLimit { actual: u64, limit: u64 },

    #[error("server.max_batch_items ({actual}) must be between 1 and {limit}")]
    InvalidBatchLimit { actual: usize, limit: usize },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_workers(config)?;
    validate_registry(config)?;
    validate_retention(config)?;
    validate_engine(config)?;
    validate_server(config)?;
    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    let workers = &config.workers;

    if workers.max_concurrent == 0 {
        return Err(ValidationError::NoWorkers);
    }

    if workers.task_timeout_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "workers.task_timeout_secs",
        });
    }

    if workers.progress_interval_ms > MAX_PROGRESS_INTERVAL_MS {
        return Err(ValidationError::ProgressIntervalTooLong {
            actual: workers.progress_interval_ms,
            limit: MAX_PROGRESS_INTERVAL_MS,
        });
    }

    Ok(())
}

fn validate_registry(config: &Config) -> Result<(), ValidationError> {
    if config.registry.max_active_jobs == 0 {
        return Err(ValidationError::NoRegistryCapacity);
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.job_ttl_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "retention.job_ttl_secs",
        });
    }

    if config.retention.sweep_interval_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "retention.sweep_interval_secs",
        });
    }

    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    if config.engine.binary.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            field: "engine.binary",
        });
    }

    if config.engine.download_dir.as_os_str().is_empty() {
        return Err(ValidationError::EmptyField {
            field: "engine.download_dir",
        });
    }

    if config.defaults.quality.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            field: "defaults.quality",
        });
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_body_bytes.as_u64() > MAX_BODY_BYTES {
        return Err(ValidationError::BodySizeExceedsLimit {
            actual: config.server.max_body_bytes.as_u64(),
            limit: MAX_BODY_BYTES,
        });
    }

    let batch = config.server.max_batch_items;
    if batch == 0 || batch > MAX_BATCH_ITEMS {
        return Err(ValidationError::InvalidBatchLimit {
            actual: batch,
            limit: MAX_BATCH_ITEMS,
        });
    }

    if config.server.ws_heartbeat_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "server.ws_heartbeat_secs",
        });
    }

    Ok(())
}
