use thiserror::Error;

use super::models::{CollectionRequest, StartBatchRequest};
use crate::orchestrator::validate_url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("url must be a non-empty http/https url: '{0}'")]
    InvalidUrl(String),
    #[error("videos[{index}] must include an http/https url")]
    InvalidItemUrl { index: usize },
    #[error("batch contains {count} videos, limit is {limit}")]
    TooManyItems { count: usize, limit: usize },
    #[error("max_videos must be at least 1")]
    InvalidMaxVideos,
}

pub fn validate_single_url(url: &str) -> Result<(), RequestValidationError> {
    validate_url(url)
        .map(|_| ())
        .map_err(|_| RequestValidationError::InvalidUrl(url.to_string()))
}

pub fn validate_batch(
    request: &StartBatchRequest,
    limit: usize,
) -> Result<(), RequestValidationError> {
    if request.videos.len() > limit {
        return Err(RequestValidationError::TooManyItems {
            count: request.videos.len(),
            limit,
        });
    }

    for (index, video) in request.videos.iter().enumerate() {
        if validate_url(&video.url).is_err() {
            return Err(RequestValidationError::InvalidItemUrl { index });
        }
    }
    Ok(())
}

pub fn validate_collection(request: &CollectionRequest) -> Result<(), RequestValidationError> {
    validate_single_url(&request.url)?;
    if request.max_videos == Some(0) {
        return Err(RequestValidationError::InvalidMaxVideos);
    }
    Ok(())
}
