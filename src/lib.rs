pub mod api;
pub mod backend;
pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod server;

// Re-exports
pub use api::routes::{create_router, AppState};
pub use core::{Cancellation, Orchestrator, Session};
pub use errors::{PipelineError, ProvisionError};
