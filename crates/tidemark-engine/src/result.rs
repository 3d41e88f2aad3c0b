//! Invocation result types.

use chrono::NaiveDate;

/// What one orchestrator invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSummary {
    pub run_date: NaiveDate,
    /// Effective dates that completed successfully, across all jobs.
    pub succeeded_runs: usize,
    pub failed_jobs: Vec<String>,
    pub skipped_jobs: Vec<String>,
    /// Jobs in the plan with no pending effective date.
    pub caught_up_jobs: Vec<String>,
}

impl InvocationSummary {
    #[must_use]
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            succeeded_runs: 0,
            failed_jobs: Vec::new(),
            skipped_jobs: Vec::new(),
            caught_up_jobs: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed_jobs.is_empty()
    }
}

/// Outcome of validating every active job definition.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub valid_jobs: Vec<String>,
    /// `(job name, error text)` pairs.
    pub invalid_jobs: Vec<(String, String)>,
}

impl CheckReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.invalid_jobs.is_empty()
    }
}
