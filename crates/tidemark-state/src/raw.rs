//! Driver-neutral decoding of `job_runs` rows.

use chrono::{NaiveDate, NaiveDateTime};
use tidemark_types::control::{EffectiveRange, JobId, JobRun, RunId};

use crate::error::{self, StoreError};

/// Column values in [`RUN_COLUMNS`](crate::schema::RUN_COLUMNS) order,
/// before domain validation.
pub(crate) struct RawRun {
    pub run_id: i64,
    pub job_id: i64,
    pub run_date: NaiveDate,
    pub min_effective_date: Option<NaiveDate>,
    pub max_effective_date: Option<NaiveDate>,
    pub attempt_number: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub rows_processed: Option<i64>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl RawRun {
    pub(crate) fn into_run(self) -> error::Result<JobRun> {
        let effective = match (self.min_effective_date, self.max_effective_date) {
            (Some(min), Some(max)) => Some(EffectiveRange { min, max }),
            _ => None,
        };
        let attempt = u32::try_from(self.attempt_number).map_err(|_| {
            StoreError::Corrupt(format!(
                "run {} has attempt number {}",
                self.run_id, self.attempt_number
            ))
        })?;
        let rows_processed = self
            .rows_processed
            .map(u64::try_from)
            .transpose()
            .map_err(|_| {
                StoreError::Corrupt(format!("run {} has negative rows_processed", self.run_id))
            })?;

        Ok(JobRun {
            run_id: RunId::new(self.run_id),
            job_id: JobId::new(self.job_id),
            run_date: self.run_date,
            effective,
            attempt,
            status: self.status.parse()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            rows_processed,
            error_message: self.error_message,
            triggered_by: self.triggered_by.parse()?,
        })
    }
}

/// Clamp a row count into a signed 64-bit column.
pub(crate) fn rows_to_i64(rows: u64) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}
