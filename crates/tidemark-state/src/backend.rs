//! Control store trait definition.
//!
//! [`ControlStore`] is the persistence contract for the job registry and
//! the run audit trail. Model types live in [`tidemark_types::control`].

use std::collections::HashSet;

use chrono::NaiveDate;
use tidemark_types::control::{JobDependency, JobId, JobRegistration, JobRun, NewRun, RunId};

use crate::error;

/// Storage contract for the registry and run history.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ControlStore>`.
/// Status updates only succeed along legal lifecycle transitions; anything
/// else yields [`StoreError::InvalidTransition`](crate::StoreError::InvalidTransition).
pub trait ControlStore: Send + Sync {
    /// Active jobs ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn active_jobs(&self) -> error::Result<Vec<JobRegistration>>;

    /// Every dependency edge in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn dependencies(&self) -> error::Result<Vec<JobDependency>>;

    /// Jobs with a `Succeeded` run on the given calendar run date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn succeeded_on(&self, run_date: NaiveDate) -> error::Result<HashSet<JobId>>;

    /// Jobs with at least one `Succeeded` run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn ever_succeeded(&self) -> error::Result<HashSet<JobId>>;

    /// Highest `max_effective_date` among the job's successful runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn last_succeeded_effective_date(&self, job: JobId) -> error::Result<Option<NaiveDate>>;

    /// One more than the highest attempt recorded for `(job, effective_date)`;
    /// `None` is its own key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn next_attempt_number(&self, job: JobId, effective_date: Option<NaiveDate>)
        -> error::Result<u32>;

    /// Insert a `Pending` run and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn create_run(&self, run: &NewRun) -> error::Result<RunId>;

    /// `Pending -> Running`, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure or an
    /// illegal transition.
    fn mark_running(&self, run: RunId) -> error::Result<()>;

    /// `Running -> Succeeded`, recording rows processed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure or an
    /// illegal transition.
    fn mark_succeeded(&self, run: RunId, rows_processed: u64) -> error::Result<()>;

    /// `Running -> Failed`, recording the error text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure or an
    /// illegal transition.
    fn mark_failed(&self, run: RunId, error_message: &str) -> error::Result<()>;

    /// `Pending -> Skipped`, recording why.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure or an
    /// illegal transition.
    fn mark_skipped(&self, run: RunId, reason: &str) -> error::Result<()>;

    /// Full run history of one job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn runs_for_job(&self, job: JobId) -> error::Result<Vec<JobRun>>;
}
