//! Orchestration crate for tidemark pipeline runs.

pub mod config;
pub mod errors;
pub mod hooks;
pub mod orchestrator;
pub mod result;
pub mod settings;
pub mod sweeper;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use hooks::{HookRegistry, SinkHook, SourceHook};
pub use orchestrator::{check_pipeline, open_store, run_pipeline, RunOptions};
pub use result::{CheckReport, CheckStatus, RunReport};
pub use settings::RunSettings;
