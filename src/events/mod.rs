//! Progress events and the bus that fans them out
//!
//! Events are a closed set. Each one names the job or batch it targets, and
//! every batch-related event carries the child position explicitly so
//! observers never have to derive it from identifiers.

mod bus;

pub use bus::{EventBus, EventStream};

use serde::{Deserialize, Serialize};

use crate::jobs::{ChildRef, FailureReason, JobId};

/// Batch position attached to batch-level progress events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPosition {
    pub current_index: usize,
    pub total_count: usize,
    pub current_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Percent/speed update for a single job, or a roll-up step for a batch
    Progress {
        id: JobId,
        percent: f64,
        speed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<ChildRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<BatchPosition>,
    },
    /// One batch child reached a terminal state
    ItemComplete {
        batch_id: JobId,
        index: usize,
        job_id: JobId,
        success: bool,
        title: Option<String>,
    },
    /// Terminal success. `error_count` is set for batches.
    Complete {
        id: JobId,
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_count: Option<usize>,
    },
    /// Terminal failure
    Error {
        id: JobId,
        reason: FailureReason,
        message: String,
    },
}

impl ProgressEvent {
    /// Job or batch the event is about
    pub fn target(&self) -> JobId {
        match self {
            ProgressEvent::Progress { id, .. }
            | ProgressEvent::Complete { id, .. }
            | ProgressEvent::Error { id, .. } => *id,
            ProgressEvent::ItemComplete { batch_id, .. } => *batch_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::ItemComplete { .. } => "item_complete",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_complete_targets_batch() {
        let batch_id = JobId::new();
        let event = ProgressEvent::ItemComplete {
            batch_id,
            index: 2,
            job_id: JobId::new(),
            success: false,
            title: None,
        };
        assert_eq!(event.target(), batch_id);
        assert!(!event.is_terminal());
        assert_eq!(event.kind(), "item_complete");
    }

    #[test]
    fn test_serialized_shape() {
        let id = JobId::new();
        let event = ProgressEvent::Error {
            id,
            reason: FailureReason::Timeout,
            message: "timed out after 5s".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "error");
        assert_eq!(value["reason"], "timeout");
        assert_eq!(value["id"], id.to_string());

        let progress = ProgressEvent::Progress {
            id,
            percent: 12.5,
            speed: None,
            parent: None,
            batch: None,
        };
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["kind"], "progress");
        assert!(value.get("parent").is_none());
    }
}
