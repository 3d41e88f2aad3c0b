//! `SQLite`-backed implementation of [`ControlStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use tidemark_types::control::{
    JobDependency, JobId, JobRegistration, JobRun, NewRun, RunId, RunStatus,
};

use crate::backend::ControlStore;
use crate::error::{self, StoreError};
use crate::raw::{rows_to_i64, RawRun};
use crate::schema::{RUN_COLUMNS, SQLITE_CONTROL_TABLES};

/// `SQLite`-backed control storage.
///
/// Create with [`SqliteControlStore::open`] for file-backed persistence
/// or [`SqliteControlStore::in_memory`] for tests.
pub struct SqliteControlStore {
    conn: Mutex<Connection>,
}

impl SqliteControlStore {
    /// Open or create a `SQLite` control database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created,
    /// or [`StoreError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(SQLITE_CONTROL_TABLES)
            .map_err(|e| StoreError::backend_context("create control tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Register a job. Registry administration normally happens outside the
    /// orchestrator; this exists for local setups and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure (including a
    /// duplicate name).
    pub fn register_job(
        &self,
        name: &str,
        description: Option<&str>,
        definition_path: &str,
        is_active: bool,
    ) -> error::Result<JobId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO jobs (job_name, description, job_conf_path, is_active) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, description, definition_path, is_active],
        )
        .map_err(|e| StoreError::backend_context("register_job", e))?;
        Ok(JobId::new(conn.last_insert_rowid()))
    }

    /// Add a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    pub fn add_dependency(&self, dependency: &JobDependency) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO job_dependencies (job_id, depends_on_job_id, dependency_type) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                dependency.job_id.get(),
                dependency.depends_on.get(),
                dependency.kind.as_str()
            ],
        )
        .map_err(|e| StoreError::backend_context("add_dependency", e))?;
        Ok(())
    }

    /// Turn a zero-row status update into the matching error.
    fn ensure_applied(
        conn: &Connection,
        run: RunId,
        to: RunStatus,
        affected: usize,
    ) -> error::Result<()> {
        if affected > 0 {
            return Ok(());
        }
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM job_runs WHERE run_id = ?1",
                [run.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)?;
        match current {
            None => Err(StoreError::RunNotFound(run)),
            Some(status) => Err(StoreError::InvalidTransition {
                run_id: run,
                from: status.parse()?,
                to,
            }),
        }
    }

    fn query_ids(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> error::Result<HashSet<JobId>> {
        let mut stmt = conn.prepare(sql).map_err(StoreError::backend)?;
        let ids = stmt
            .query_map(params, |row| row.get::<_, i64>(0))
            .map_err(StoreError::backend)?
            .map(|r| r.map(JobId::new))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(ids)
    }
}

impl ControlStore for SqliteControlStore {
    fn active_jobs(&self) -> error::Result<Vec<JobRegistration>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT job_id, job_name, description, job_conf_path, is_active \
                 FROM jobs WHERE is_active = 1 ORDER BY job_id",
            )
            .map_err(|e| StoreError::backend_context("active_jobs: prepare", e))?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(JobRegistration {
                    id: JobId::new(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    definition_path: row.get(3)?,
                    is_active: row.get(4)?,
                })
            })
            .map_err(|e| StoreError::backend_context("active_jobs: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(jobs)
    }

    fn dependencies(&self) -> error::Result<Vec<JobDependency>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT job_id, depends_on_job_id, dependency_type \
                 FROM job_dependencies ORDER BY job_id, depends_on_job_id",
            )
            .map_err(|e| StoreError::backend_context("dependencies: prepare", e))?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| StoreError::backend_context("dependencies: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        raw.into_iter()
            .map(|(job, upstream, kind)| {
                Ok(JobDependency {
                    job_id: JobId::new(job),
                    depends_on: JobId::new(upstream),
                    kind: kind.parse()?,
                })
            })
            .collect()
    }

    fn succeeded_on(&self, run_date: NaiveDate) -> error::Result<HashSet<JobId>> {
        let conn = self.lock_conn()?;
        Self::query_ids(
            &conn,
            "SELECT DISTINCT job_id FROM job_runs WHERE run_date = ?1 AND status = ?2",
            &[&run_date, &RunStatus::Succeeded.as_str()],
        )
    }

    fn ever_succeeded(&self) -> error::Result<HashSet<JobId>> {
        let conn = self.lock_conn()?;
        Self::query_ids(
            &conn,
            "SELECT DISTINCT job_id FROM job_runs WHERE status = ?1",
            &[&RunStatus::Succeeded.as_str()],
        )
    }

    fn last_succeeded_effective_date(&self, job: JobId) -> error::Result<Option<NaiveDate>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT MAX(max_effective_date) FROM job_runs WHERE job_id = ?1 AND status = ?2",
            rusqlite::params![job.get(), RunStatus::Succeeded.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::backend_context("last_succeeded_effective_date", e))
    }

    fn next_attempt_number(
        &self,
        job: JobId,
        effective_date: Option<NaiveDate>,
    ) -> error::Result<u32> {
        let conn = self.lock_conn()?;
        let max: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(attempt_number), 0) FROM job_runs \
                 WHERE job_id = ?1 AND max_effective_date IS ?2",
                rusqlite::params![job.get(), effective_date],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::backend_context("next_attempt_number", e))?;
        u32::try_from(max + 1)
            .map_err(|_| StoreError::Corrupt(format!("job {job} has attempt number {max}")))
    }

    fn create_run(&self, run: &NewRun) -> error::Result<RunId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO job_runs (job_id, run_date, min_effective_date, max_effective_date, \
             attempt_number, status, created_at, triggered_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run.job_id.get(),
                run.run_date,
                run.effective.map(|r| r.min),
                run.effective.map(|r| r.max),
                run.attempt,
                RunStatus::Pending.as_str(),
                Utc::now().naive_utc(),
                run.triggered_by.as_str(),
            ],
        )
        .map_err(|e| StoreError::backend_context("create_run", e))?;
        Ok(RunId::new(conn.last_insert_rowid()))
    }

    fn mark_running(&self, run: RunId) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn
            .execute(
                "UPDATE job_runs SET status = ?1, started_at = ?2 \
                 WHERE run_id = ?3 AND status = ?4",
                rusqlite::params![
                    RunStatus::Running.as_str(),
                    Utc::now().naive_utc(),
                    run.get(),
                    RunStatus::Pending.as_str(),
                ],
            )
            .map_err(|e| StoreError::backend_context("mark_running", e))?;
        Self::ensure_applied(&conn, run, RunStatus::Running, affected)
    }

    fn mark_succeeded(&self, run: RunId, rows_processed: u64) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn
            .execute(
                "UPDATE job_runs SET status = ?1, completed_at = ?2, rows_processed = ?3 \
                 WHERE run_id = ?4 AND status = ?5",
                rusqlite::params![
                    RunStatus::Succeeded.as_str(),
                    Utc::now().naive_utc(),
                    rows_to_i64(rows_processed),
                    run.get(),
                    RunStatus::Running.as_str(),
                ],
            )
            .map_err(|e| StoreError::backend_context("mark_succeeded", e))?;
        Self::ensure_applied(&conn, run, RunStatus::Succeeded, affected)
    }

    fn mark_failed(&self, run: RunId, error_message: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn
            .execute(
                "UPDATE job_runs SET status = ?1, completed_at = ?2, error_message = ?3 \
                 WHERE run_id = ?4 AND status = ?5",
                rusqlite::params![
                    RunStatus::Failed.as_str(),
                    Utc::now().naive_utc(),
                    error_message,
                    run.get(),
                    RunStatus::Running.as_str(),
                ],
            )
            .map_err(|e| StoreError::backend_context("mark_failed", e))?;
        Self::ensure_applied(&conn, run, RunStatus::Failed, affected)
    }

    fn mark_skipped(&self, run: RunId, reason: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn
            .execute(
                "UPDATE job_runs SET status = ?1, completed_at = ?2, error_message = ?3 \
                 WHERE run_id = ?4 AND status = ?5",
                rusqlite::params![
                    RunStatus::Skipped.as_str(),
                    Utc::now().naive_utc(),
                    reason,
                    run.get(),
                    RunStatus::Pending.as_str(),
                ],
            )
            .map_err(|e| StoreError::backend_context("mark_skipped", e))?;
        Self::ensure_applied(&conn, run, RunStatus::Skipped, affected)
    }

    fn runs_for_job(&self, job: JobId) -> error::Result<Vec<JobRun>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ?1 ORDER BY run_id"
            ))
            .map_err(|e| StoreError::backend_context("runs_for_job: prepare", e))?;
        let raw = stmt
            .query_map([job.get()], |row| {
                Ok(RawRun {
                    run_id: row.get(0)?,
                    job_id: row.get(1)?,
                    run_date: row.get(2)?,
                    min_effective_date: row.get(3)?,
                    max_effective_date: row.get(4)?,
                    attempt_number: row.get(5)?,
                    status: row.get(6)?,
                    created_at: row.get(7)?,
                    started_at: row.get(8)?,
                    completed_at: row.get(9)?,
                    rows_processed: row.get(10)?,
                    error_message: row.get(11)?,
                    triggered_by: row.get(12)?,
                })
            })
            .map_err(|e| StoreError::backend_context("runs_for_job: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        raw.into_iter().map(RawRun::into_run).collect()
    }
}
