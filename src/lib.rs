pub mod activity;
pub mod args;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod secret;
pub mod session;
pub mod verification;

// Re-export the types most callers touch at the crate root
pub use error::{AutomationError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, RunStatus};
