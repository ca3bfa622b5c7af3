pub mod api;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod humanize;
pub mod jobs;
pub mod observability;
pub mod orchestrator;
pub mod worker;

pub use error::OrchestratorError;
pub use orchestrator::{MediaSummary, Orchestrator};
