//! Control schema DDL.

/// Idempotent DDL for the `SQLite` control database.
pub const SQLITE_CONTROL_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
    job_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL UNIQUE,
    description TEXT,
    job_conf_path TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS job_dependencies (
    job_id INTEGER NOT NULL REFERENCES jobs(job_id),
    depends_on_job_id INTEGER NOT NULL REFERENCES jobs(job_id),
    dependency_type TEXT NOT NULL,
    PRIMARY KEY (job_id, depends_on_job_id)
);

CREATE TABLE IF NOT EXISTS job_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(job_id),
    run_date TEXT NOT NULL,
    min_effective_date TEXT,
    max_effective_date TEXT,
    attempt_number INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    completed_at TEXT,
    rows_processed INTEGER,
    error_message TEXT,
    triggered_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job_effective
    ON job_runs (job_id, max_effective_date);
";

/// Idempotent DDL for the `PostgreSQL` control schema.
///
/// The schema is normally owned by the deployment; this is applied only by
/// [`PostgresControlStore::ensure_schema`](crate::PostgresControlStore::ensure_schema).
pub const POSTGRES_CONTROL_TABLES: &str = r"
CREATE SCHEMA IF NOT EXISTS control;

CREATE TABLE IF NOT EXISTS control.jobs (
    job_id BIGSERIAL PRIMARY KEY,
    job_name TEXT NOT NULL UNIQUE,
    description TEXT,
    job_conf_path TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS control.job_dependencies (
    job_id BIGINT NOT NULL REFERENCES control.jobs(job_id),
    depends_on_job_id BIGINT NOT NULL REFERENCES control.jobs(job_id),
    dependency_type TEXT NOT NULL CHECK (dependency_type IN ('SameDay', 'Latest')),
    PRIMARY KEY (job_id, depends_on_job_id)
);

CREATE TABLE IF NOT EXISTS control.job_runs (
    run_id BIGSERIAL PRIMARY KEY,
    job_id BIGINT NOT NULL REFERENCES control.jobs(job_id),
    run_date DATE NOT NULL,
    min_effective_date DATE,
    max_effective_date DATE,
    attempt_number INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    started_at TIMESTAMP,
    completed_at TIMESTAMP,
    rows_processed BIGINT,
    error_message TEXT,
    triggered_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job_effective
    ON control.job_runs (job_id, max_effective_date);
";

/// Columns selected when materialising a [`JobRun`](tidemark_types::control::JobRun),
/// in the order both backends decode them.
pub(crate) const RUN_COLUMNS: &str = "run_id, job_id, run_date, min_effective_date, \
     max_effective_date, attempt_number, status, created_at, started_at, completed_at, \
     rows_processed, error_message, triggered_by";
