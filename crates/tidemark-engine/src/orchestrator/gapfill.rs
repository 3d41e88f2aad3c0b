//! Effective dates a job still owes.

use chrono::{Days, NaiveDate};

use crate::errors::{PipelineError, Result};

/// Every date from the day after the last success (or `first_effective_date`
/// for a job that never succeeded) through `today`, ascending.
///
/// Empty when the job is already caught up.
///
/// # Errors
///
/// Returns [`PipelineError::Configuration`] when the job has never succeeded
/// and declares no first effective date.
pub fn pending_effective_dates(
    job: &str,
    last_succeeded: Option<NaiveDate>,
    first_effective_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    let start = match (last_succeeded, first_effective_date) {
        (Some(last), _) => match last.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return Ok(Vec::new()),
        },
        (None, Some(first)) => first,
        (None, None) => {
            return Err(PipelineError::config(format!(
                "job '{job}' has never succeeded and has no firstEffectiveDate"
            )))
        }
    };
    Ok(start.iter_days().take_while(|d| *d <= today).collect())
}
