//! Dependency-aware scheduling of registered jobs.
//!
//! [`plan`] orders the jobs that still need to run, [`gapfill`] works out
//! which effective dates each one owes, and [`service`] drives both against
//! the control store, recording every attempt.

pub mod gapfill;
pub mod plan;
pub mod service;

use tidemark_types::control::JobRegistration;
use tidemark_types::SharedState;

use crate::config::types::JobDefinition;
use crate::errors::Result;

pub use gapfill::pending_effective_dates;
pub use plan::build_execution_plan;
pub use service::{ExecutorService, RunRequest};

/// What the executor service needs from a job runner.
pub trait JobLauncher: Send + Sync {
    /// Load the definition a registration points at.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`](crate::PipelineError::Configuration)
    /// when the definition is missing or malformed.
    fn load_definition(&self, job: &JobRegistration) -> Result<JobDefinition>;

    /// Run a loaded definition for one effective date.
    ///
    /// # Errors
    ///
    /// Any build or step error.
    fn launch(&self, definition: &JobDefinition, state: SharedState) -> Result<SharedState>;
}
