//! HTTP and WebSocket transport over [`crate::orchestrator::Orchestrator`]

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
mod validation;
mod ws;

pub use error::ApiError;
pub use server::{router, serve};
pub use state::AppState;
