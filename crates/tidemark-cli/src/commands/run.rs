use std::path::Path;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use tidemark_engine::{InvocationSummary, RunRequest};

const DATE_ARG_FORMAT: &str = "%Y-%m-%d";

/// Interpret the positional arguments.
///
/// A first argument that parses as a date is a backfill date; otherwise it
/// is a job name and no second argument is allowed.
pub fn parse_request(first: Option<&str>, second: Option<&str>) -> Result<RunRequest> {
    let date = first.and_then(|arg| NaiveDate::parse_from_str(arg, DATE_ARG_FORMAT).ok());
    Ok(match (first, date, second) {
        (None, _, _) => RunRequest::default(),
        (Some(_), Some(date), job) => RunRequest {
            effective_date: Some(date),
            job_name: job.map(str::to_string),
        },
        (Some(job), None, None) => RunRequest {
            effective_date: None,
            job_name: Some(job.to_string()),
        },
        (Some(first), None, Some(_)) => {
            bail!("expected an effective date (YYYY-MM-DD) before the job name, got '{first}'")
        }
    })
}

/// Execute one orchestrator invocation and report what happened.
pub fn execute(config_path: &Path, request: &RunRequest) -> Result<()> {
    let service = super::build_service(config_path)?;

    tracing::info!(
        effective_date = ?request.effective_date,
        job = ?request.job_name,
        "invocation starting"
    );
    let summary = service.run(request)?;
    print_summary(&summary);

    if summary.has_failures() {
        bail!("{} job(s) failed", summary.failed_jobs.len());
    }
    Ok(())
}

fn print_summary(summary: &InvocationSummary) {
    println!("Run date {}", summary.run_date);
    println!("  Succeeded runs: {}", summary.succeeded_runs);
    print_jobs("Caught up", &summary.caught_up_jobs);
    print_jobs("Failed", &summary.failed_jobs);
    print_jobs("Skipped", &summary.skipped_jobs);
}

fn print_jobs(label: &str, jobs: &[String]) {
    if !jobs.is_empty() {
        println!("  {:15} {}", format!("{label}:"), jobs.join(", "));
    }
}
