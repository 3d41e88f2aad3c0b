//! The executor service: one invocation of the orchestrator.
//!
//! Reads the registry, plans, then runs each planned job over its pending
//! effective dates. This is the only place pipeline errors are caught: a
//! failure is recorded against its run, halts that job's later dates and
//! skips every SameDay dependent planned after it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tidemark_state::ControlStore;
use tidemark_types::control::{
    DependencyKind, EffectiveRange, JobDependency, JobId, JobRegistration, NewRun, TriggerSource,
};
use tidemark_types::SharedState;

use super::gapfill::pending_effective_dates;
use super::plan::build_execution_plan;
use super::JobLauncher;
use crate::config::types::JobDefinition;
use crate::config::validator::validate_job_definition;
use crate::errors::{PipelineError, Result};
use crate::result::{CheckReport, InvocationSummary};

/// Which jobs and dates an invocation covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Backfill exactly this date instead of gap-filling.
    pub effective_date: Option<NaiveDate>,
    /// Restrict to one job, matched case-insensitively.
    pub job_name: Option<String>,
}

impl RunRequest {
    fn trigger(&self) -> TriggerSource {
        if self.effective_date.is_some() {
            TriggerSource::Backfill
        } else {
            TriggerSource::Scheduler
        }
    }
}

enum JobOutcome {
    CaughtUp,
    Succeeded(usize),
    /// Carries the dates that succeeded before the failing one.
    Failed(usize),
}

/// Runs registered jobs against a control store.
pub struct ExecutorService {
    store: Arc<dyn ControlStore>,
    launcher: Arc<dyn JobLauncher>,
    today: NaiveDate,
}

impl ExecutorService {
    /// `today` is the calendar run date stamped on every run row.
    pub fn new(
        store: Arc<dyn ControlStore>,
        launcher: Arc<dyn JobLauncher>,
        today: NaiveDate,
    ) -> Self {
        Self {
            store,
            launcher,
            today,
        }
    }

    /// Run one invocation.
    ///
    /// # Errors
    ///
    /// Only plan-level failures: an unknown job name, a dependency cycle or
    /// a control store error. Job failures are recorded and reported in the
    /// summary instead.
    pub fn run(&self, request: &RunRequest) -> Result<InvocationSummary> {
        let jobs = self.store.active_jobs()?;
        let dependencies = self.store.dependencies()?;
        let candidates = match &request.job_name {
            Some(name) => vec![find_job(&jobs, name)?],
            None => jobs,
        };

        // An explicit date is a deliberate rerun, even of today's successes.
        let succeeded_today = if request.effective_date.is_some() {
            HashSet::new()
        } else {
            self.store.succeeded_on(self.today)?
        };
        let ever_succeeded = self.store.ever_succeeded()?;
        let plan =
            build_execution_plan(&candidates, &dependencies, &succeeded_today, &ever_succeeded)?;

        let mut summary = InvocationSummary::new(self.today);
        if plan.is_empty() {
            tracing::info!(run_date = %self.today, "nothing to run");
            return Ok(summary);
        }
        tracing::info!(run_date = %self.today, jobs = plan.len(), "{} job(s) in plan", plan.len());

        let mut blocked: HashSet<JobId> = HashSet::new();
        for job in &plan {
            if let Some(upstream) = blocking_upstream(job.id, &dependencies, &blocked) {
                let upstream = plan
                    .iter()
                    .find(|j| j.id == upstream)
                    .map_or_else(|| upstream.to_string(), |j| j.name.clone());
                self.record_skip(job, &upstream)?;
                blocked.insert(job.id);
                summary.skipped_jobs.push(job.name.clone());
                continue;
            }

            match self.run_job(job, request)? {
                JobOutcome::CaughtUp => summary.caught_up_jobs.push(job.name.clone()),
                JobOutcome::Succeeded(runs) => summary.succeeded_runs += runs,
                JobOutcome::Failed(runs) => {
                    summary.succeeded_runs += runs;
                    blocked.insert(job.id);
                    summary.failed_jobs.push(job.name.clone());
                }
            }
        }

        if summary.has_failures() {
            tracing::error!(
                failed = summary.failed_jobs.len(),
                skipped = summary.skipped_jobs.len(),
                "{} job(s) failed",
                summary.failed_jobs.len()
            );
        } else {
            tracing::info!(
                succeeded_runs = summary.succeeded_runs,
                caught_up = summary.caught_up_jobs.len(),
                "invocation complete"
            );
        }
        Ok(summary)
    }

    /// Load and validate every active job definition without running anything.
    ///
    /// # Errors
    ///
    /// Returns a control store error; definition problems go in the report.
    pub fn check(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        for job in self.store.active_jobs()? {
            let checked = self
                .launcher
                .load_definition(&job)
                .map_err(|e| e.to_string())
                .and_then(|def| validate_job_definition(&def).map_err(|e| format!("{e:#}")));
            match checked {
                Ok(()) => report.valid_jobs.push(job.name),
                Err(message) => report.invalid_jobs.push((job.name, message)),
            }
        }
        Ok(report)
    }

    fn run_job(&self, job: &JobRegistration, request: &RunRequest) -> Result<JobOutcome> {
        let trigger = request.trigger();
        let prepared = self.launcher.load_definition(job).and_then(|definition| {
            let dates = self.dates_for(job, &definition, request.effective_date)?;
            Ok((definition, dates))
        });
        let (definition, dates) = match prepared {
            Ok(prepared) => prepared,
            Err(PipelineError::Control(e)) => return Err(e.into()),
            Err(e) => {
                self.record_unscheduled_failure(job, trigger, &e)?;
                return Ok(JobOutcome::Failed(0));
            }
        };

        if dates.is_empty() {
            tracing::info!(job = %job.name, "caught up");
            return Ok(JobOutcome::CaughtUp);
        }

        for (i, date) in dates.iter().enumerate() {
            if !self.run_date(job, &definition, *date, trigger)? {
                let halted = dates.len() - i - 1;
                if halted > 0 {
                    tracing::warn!(job = %job.name, halted, "later effective dates halted");
                }
                return Ok(JobOutcome::Failed(i));
            }
        }
        Ok(JobOutcome::Succeeded(dates.len()))
    }

    fn dates_for(
        &self,
        job: &JobRegistration,
        definition: &JobDefinition,
        effective_date: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>> {
        if let Some(date) = effective_date {
            return Ok(vec![date]);
        }
        let last = self.store.last_succeeded_effective_date(job.id)?;
        pending_effective_dates(&job.name, last, definition.first_effective_date, self.today)
    }

    /// One attempt for one effective date. `Ok(false)` means the attempt failed
    /// and was recorded.
    fn run_date(
        &self,
        job: &JobRegistration,
        definition: &JobDefinition,
        date: NaiveDate,
        trigger: TriggerSource,
    ) -> Result<bool> {
        let attempt = self.store.next_attempt_number(job.id, Some(date))?;
        let run_id = self.store.create_run(&NewRun {
            job_id: job.id,
            run_date: self.today,
            effective: Some(EffectiveRange::single(date)),
            attempt,
            triggered_by: trigger,
        })?;
        self.store.mark_running(run_id)?;
        tracing::info!(job = %job.name, %run_id, attempt, effective_date = %date, "running");

        match self
            .launcher
            .launch(definition, SharedState::for_effective_range(date, date))
        {
            Ok(state) => {
                let rows = state.total_rows();
                self.store.mark_succeeded(run_id, rows)?;
                tracing::info!(job = %job.name, %run_id, effective_date = %date, rows, "succeeded");
                Ok(true)
            }
            Err(e) => {
                let message = error_chain(&e);
                self.store.mark_failed(run_id, &message)?;
                tracing::error!(
                    job = %job.name,
                    %run_id,
                    attempt,
                    effective_date = %date,
                    error = %message,
                    "FAILED"
                );
                Ok(false)
            }
        }
    }

    /// A failure before any effective date was chosen: bad definition or no
    /// watermark to start from.
    fn record_unscheduled_failure(
        &self,
        job: &JobRegistration,
        trigger: TriggerSource,
        error: &PipelineError,
    ) -> Result<()> {
        let message = error_chain(error);
        let attempt = self.store.next_attempt_number(job.id, None)?;
        let run_id = self.store.create_run(&NewRun {
            job_id: job.id,
            run_date: self.today,
            effective: None,
            attempt,
            triggered_by: trigger,
        })?;
        self.store.mark_running(run_id)?;
        self.store.mark_failed(run_id, &message)?;
        tracing::error!(job = %job.name, %run_id, error = %message, "FAILED");
        Ok(())
    }

    fn record_skip(&self, job: &JobRegistration, upstream: &str) -> Result<()> {
        let reason = format!("Skipped: SameDay dependency '{upstream}' did not succeed");
        let attempt = self.store.next_attempt_number(job.id, None)?;
        let run_id = self.store.create_run(&NewRun {
            job_id: job.id,
            run_date: self.today,
            effective: None,
            attempt,
            triggered_by: TriggerSource::Dependency,
        })?;
        self.store.mark_skipped(run_id, &reason)?;
        tracing::warn!(job = %job.name, %run_id, upstream, "skipping");
        Ok(())
    }
}

fn find_job(jobs: &[JobRegistration], name: &str) -> Result<JobRegistration> {
    jobs.iter()
        .find(|job| job.name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| PipelineError::UnknownJob(name.to_string()))
}

fn blocking_upstream(
    job: JobId,
    dependencies: &[JobDependency],
    blocked: &HashSet<JobId>,
) -> Option<JobId> {
    dependencies
        .iter()
        .filter(|d| d.job_id == job && d.kind == DependencyKind::SameDay)
        .map(|d| d.depends_on)
        .find(|upstream| blocked.contains(upstream))
}

/// The error and every source beneath it, outermost first.
fn error_chain(error: &PipelineError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
