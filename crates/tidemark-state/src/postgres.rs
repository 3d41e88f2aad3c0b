//! `PostgreSQL`-backed implementation of [`ControlStore`].
//!
//! Uses the sync `postgres` crate. Every operation opens its own
//! connection and drops it before returning; no session outlives a call.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use tidemark_types::control::{
    JobDependency, JobId, JobRegistration, JobRun, NewRun, RunId, RunStatus,
};

use crate::backend::ControlStore;
use crate::error::{self, StoreError};
use crate::raw::{rows_to_i64, RawRun};
use crate::schema::{POSTGRES_CONTROL_TABLES, RUN_COLUMNS};

/// `PostgreSQL`-backed control storage under the `control` schema.
///
/// Create with [`PostgresControlStore::new`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=etl user=postgres"`).
pub struct PostgresControlStore {
    connstr: String,
}

impl PostgresControlStore {
    /// `connstr` is a libpq-style connection string or `PostgreSQL` URI:
    /// - `"host=localhost port=5432 dbname=etl user=postgres"`
    /// - `"postgresql://postgres@localhost/etl"`
    ///
    /// No connection is made until the first operation.
    #[must_use]
    pub fn new(connstr: impl Into<String>) -> Self {
        Self {
            connstr: connstr.into(),
        }
    }

    fn connect(&self, operation: &str) -> error::Result<Client> {
        Client::connect(&self.connstr, NoTls)
            .map_err(|e| StoreError::backend_context(&format!("{operation}: connect"), e))
    }

    /// Create the `control` schema and tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if connection or DDL execution fails.
    pub fn ensure_schema(&self) -> error::Result<()> {
        let mut client = self.connect("ensure_schema")?;
        client
            .batch_execute(POSTGRES_CONTROL_TABLES)
            .map_err(|e| StoreError::backend_context("ensure_schema", e))
    }

    fn query_ids(
        &self,
        operation: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> error::Result<HashSet<JobId>> {
        let mut client = self.connect(operation)?;
        let rows = client
            .query(sql, params)
            .map_err(|e| StoreError::backend_context(operation, e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, i64>(0)
                    .map(JobId::new)
                    .map_err(|e| StoreError::backend_context(operation, e))
            })
            .collect()
    }

    /// Apply a guarded status update; zero affected rows becomes the
    /// matching error.
    fn transition(
        &self,
        operation: &str,
        run: RunId,
        to: RunStatus,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> error::Result<()> {
        let mut client = self.connect(operation)?;
        let affected = client
            .execute(sql, params)
            .map_err(|e| StoreError::backend_context(operation, e))?;
        if affected > 0 {
            return Ok(());
        }
        let current = client
            .query_opt(
                "SELECT status FROM control.job_runs WHERE run_id = $1",
                &[&run.get()],
            )
            .map_err(|e| StoreError::backend_context(operation, e))?;
        match current {
            None => Err(StoreError::RunNotFound(run)),
            Some(row) => {
                let status: String = row
                    .try_get(0)
                    .map_err(|e| StoreError::backend_context(operation, e))?;
                Err(StoreError::InvalidTransition {
                    run_id: run,
                    from: status.parse()?,
                    to,
                })
            }
        }
    }
}

fn decode_run(row: &Row) -> Result<RawRun, postgres::Error> {
    Ok(RawRun {
        run_id: row.try_get(0)?,
        job_id: row.try_get(1)?,
        run_date: row.try_get(2)?,
        min_effective_date: row.try_get(3)?,
        max_effective_date: row.try_get(4)?,
        attempt_number: i64::from(row.try_get::<_, i32>(5)?),
        status: row.try_get(6)?,
        created_at: row.try_get(7)?,
        started_at: row.try_get(8)?,
        completed_at: row.try_get(9)?,
        rows_processed: row.try_get(10)?,
        error_message: row.try_get(11)?,
        triggered_by: row.try_get(12)?,
    })
}

impl ControlStore for PostgresControlStore {
    fn active_jobs(&self) -> error::Result<Vec<JobRegistration>> {
        let mut client = self.connect("active_jobs")?;
        let rows = client
            .query(
                "SELECT job_id, job_name, description, job_conf_path, is_active \
                 FROM control.jobs WHERE is_active ORDER BY job_id",
                &[],
            )
            .map_err(|e| StoreError::backend_context("active_jobs", e))?;
        rows.iter()
            .map(|row| {
                Ok(JobRegistration {
                    id: JobId::new(row.try_get(0)?),
                    name: row.try_get(1)?,
                    description: row.try_get(2)?,
                    definition_path: row.try_get(3)?,
                    is_active: row.try_get(4)?,
                })
            })
            .collect::<Result<Vec<_>, postgres::Error>>()
            .map_err(|e| StoreError::backend_context("active_jobs: decode", e))
    }

    fn dependencies(&self) -> error::Result<Vec<JobDependency>> {
        let mut client = self.connect("dependencies")?;
        let rows = client
            .query(
                "SELECT job_id, depends_on_job_id, dependency_type \
                 FROM control.job_dependencies ORDER BY job_id, depends_on_job_id",
                &[],
            )
            .map_err(|e| StoreError::backend_context("dependencies", e))?;
        rows.iter()
            .map(|row| {
                let job: i64 = row
                    .try_get(0)
                    .map_err(|e| StoreError::backend_context("dependencies: decode", e))?;
                let upstream: i64 = row
                    .try_get(1)
                    .map_err(|e| StoreError::backend_context("dependencies: decode", e))?;
                let kind: String = row
                    .try_get(2)
                    .map_err(|e| StoreError::backend_context("dependencies: decode", e))?;
                Ok(JobDependency {
                    job_id: JobId::new(job),
                    depends_on: JobId::new(upstream),
                    kind: kind.parse()?,
                })
            })
            .collect()
    }

    fn succeeded_on(&self, run_date: NaiveDate) -> error::Result<HashSet<JobId>> {
        self.query_ids(
            "succeeded_on",
            "SELECT DISTINCT job_id FROM control.job_runs WHERE run_date = $1 AND status = $2",
            &[&run_date, &RunStatus::Succeeded.as_str()],
        )
    }

    fn ever_succeeded(&self) -> error::Result<HashSet<JobId>> {
        self.query_ids(
            "ever_succeeded",
            "SELECT DISTINCT job_id FROM control.job_runs WHERE status = $1",
            &[&RunStatus::Succeeded.as_str()],
        )
    }

    fn last_succeeded_effective_date(&self, job: JobId) -> error::Result<Option<NaiveDate>> {
        let mut client = self.connect("last_succeeded_effective_date")?;
        let row = client
            .query_one(
                "SELECT MAX(max_effective_date) FROM control.job_runs \
                 WHERE job_id = $1 AND status = $2",
                &[&job.get(), &RunStatus::Succeeded.as_str()],
            )
            .map_err(|e| StoreError::backend_context("last_succeeded_effective_date", e))?;
        row.try_get(0)
            .map_err(|e| StoreError::backend_context("last_succeeded_effective_date", e))
    }

    fn next_attempt_number(
        &self,
        job: JobId,
        effective_date: Option<NaiveDate>,
    ) -> error::Result<u32> {
        let mut client = self.connect("next_attempt_number")?;
        let row = client
            .query_one(
                "SELECT COALESCE(MAX(attempt_number), 0) FROM control.job_runs \
                 WHERE job_id = $1 AND max_effective_date IS NOT DISTINCT FROM $2",
                &[&job.get(), &effective_date],
            )
            .map_err(|e| StoreError::backend_context("next_attempt_number", e))?;
        let max: i32 = row
            .try_get(0)
            .map_err(|e| StoreError::backend_context("next_attempt_number", e))?;
        u32::try_from(max + 1)
            .map_err(|_| StoreError::Corrupt(format!("job {job} has attempt number {max}")))
    }

    fn create_run(&self, run: &NewRun) -> error::Result<RunId> {
        let attempt = i32::try_from(run.attempt)
            .map_err(|_| StoreError::Corrupt(format!("attempt {} out of range", run.attempt)))?;
        let mut client = self.connect("create_run")?;
        let row = client
            .query_one(
                "INSERT INTO control.job_runs (job_id, run_date, min_effective_date, \
                 max_effective_date, attempt_number, status, created_at, triggered_by) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING run_id",
                &[
                    &run.job_id.get(),
                    &run.run_date,
                    &run.effective.map(|r| r.min),
                    &run.effective.map(|r| r.max),
                    &attempt,
                    &RunStatus::Pending.as_str(),
                    &Utc::now().naive_utc(),
                    &run.triggered_by.as_str(),
                ],
            )
            .map_err(|e| StoreError::backend_context("create_run", e))?;
        let id: i64 = row
            .try_get(0)
            .map_err(|e| StoreError::backend_context("create_run", e))?;
        Ok(RunId::new(id))
    }

    fn mark_running(&self, run: RunId) -> error::Result<()> {
        self.transition(
            "mark_running",
            run,
            RunStatus::Running,
            "UPDATE control.job_runs SET status = $1, started_at = $2 \
             WHERE run_id = $3 AND status = $4",
            &[
                &RunStatus::Running.as_str(),
                &Utc::now().naive_utc(),
                &run.get(),
                &RunStatus::Pending.as_str(),
            ],
        )
    }

    fn mark_succeeded(&self, run: RunId, rows_processed: u64) -> error::Result<()> {
        self.transition(
            "mark_succeeded",
            run,
            RunStatus::Succeeded,
            "UPDATE control.job_runs SET status = $1, completed_at = $2, rows_processed = $3 \
             WHERE run_id = $4 AND status = $5",
            &[
                &RunStatus::Succeeded.as_str(),
                &Utc::now().naive_utc(),
                &rows_to_i64(rows_processed),
                &run.get(),
                &RunStatus::Running.as_str(),
            ],
        )
    }

    fn mark_failed(&self, run: RunId, error_message: &str) -> error::Result<()> {
        self.transition(
            "mark_failed",
            run,
            RunStatus::Failed,
            "UPDATE control.job_runs SET status = $1, completed_at = $2, error_message = $3 \
             WHERE run_id = $4 AND status = $5",
            &[
                &RunStatus::Failed.as_str(),
                &Utc::now().naive_utc(),
                &error_message,
                &run.get(),
                &RunStatus::Running.as_str(),
            ],
        )
    }

    fn mark_skipped(&self, run: RunId, reason: &str) -> error::Result<()> {
        self.transition(
            "mark_skipped",
            run,
            RunStatus::Skipped,
            "UPDATE control.job_runs SET status = $1, completed_at = $2, error_message = $3 \
             WHERE run_id = $4 AND status = $5",
            &[
                &RunStatus::Skipped.as_str(),
                &Utc::now().naive_utc(),
                &reason,
                &run.get(),
                &RunStatus::Pending.as_str(),
            ],
        )
    }

    fn runs_for_job(&self, job: JobId) -> error::Result<Vec<JobRun>> {
        let mut client = self.connect("runs_for_job")?;
        let rows = client
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM control.job_runs WHERE job_id = $1 ORDER BY run_id"
                ),
                &[&job.get()],
            )
            .map_err(|e| StoreError::backend_context("runs_for_job", e))?;
        rows.iter()
            .map(|row| {
                decode_run(row)
                    .map_err(|e| StoreError::backend_context("runs_for_job: decode", e))?
                    .into_run()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defers_connection() {
        // Unroutable address: construction must not attempt to connect.
        let store = PostgresControlStore::new("host=203.0.113.1 connect_timeout=1");
        assert_eq!(store.connstr, "host=203.0.113.1 connect_timeout=1");
    }

    #[test]
    fn control_ddl_targets_control_schema() {
        assert!(POSTGRES_CONTROL_TABLES.contains("CREATE SCHEMA IF NOT EXISTS control"));
        assert!(POSTGRES_CONTROL_TABLES.contains("control.job_runs"));
    }
}
