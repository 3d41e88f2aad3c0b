//! Pipeline steps, job runner and dependency-aware orchestrator for tidemark.

#![warn(clippy::pedantic)]

pub mod arrow;
pub mod config;
pub mod errors;
pub mod factory;
pub mod orchestrator;
pub mod paths;
pub mod result;
pub mod runner;
pub mod steps;
pub mod warehouse;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use factory::StepFactory;
pub use orchestrator::{ExecutorService, JobLauncher, RunRequest};
pub use paths::ProjectRoot;
pub use result::{CheckReport, InvocationSummary};
pub use runner::JobRunner;
