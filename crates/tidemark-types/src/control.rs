//! Control-plane model types.
//!
//! Pure data types describing registered jobs, their dependency edges and
//! the run audit trail. Kept in the types crate so both the control store
//! and the orchestrator can share them without circular dependencies.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Registry identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of one persisted run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RunId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A registered job. Read-only for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRegistration {
    pub id: JobId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pointer to the job definition document.
    pub definition_path: String,
    pub is_active: bool,
}

/// How an upstream job must have succeeded before its dependent may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Upstream succeeded for today's run date.
    SameDay,
    /// Upstream succeeded at least once, ever.
    Latest,
}

impl DependencyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameDay => "SameDay",
            Self::Latest => "Latest",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SameDay" => Ok(Self::SameDay),
            "Latest" => Ok(Self::Latest),
            other => Err(ParseEnumError::new("dependency kind", other)),
        }
    }
}

/// Directed edge: `job_id` depends on `depends_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDependency {
    pub job_id: JobId,
    pub depends_on: JobId,
    pub kind: DependencyKind,
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Lifecycle status of a run attempt.
///
/// `Pending -> Running -> Succeeded | Failed`, or `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl RunStatus {
    /// Storage string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Skipped)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Skipped" => Ok(Self::Skipped),
            other => Err(ParseEnumError::new("run status", other)),
        }
    }
}

/// What caused a run row to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Automatic gap-fill advance.
    Scheduler,
    /// Explicit effective-date override.
    Backfill,
    /// Skip recorded because an upstream dependency failed.
    Dependency,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Backfill => "backfill",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduler" => Ok(Self::Scheduler),
            "backfill" => Ok(Self::Backfill),
            "dependency" => Ok(Self::Dependency),
            other => Err(ParseEnumError::new("trigger source", other)),
        }
    }
}

/// Inclusive effective-date range processed by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveRange {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

impl EffectiveRange {
    /// Single-day range; the orchestrator always runs one date at a time.
    #[must_use]
    pub fn single(date: NaiveDate) -> Self {
        Self {
            min: date,
            max: date,
        }
    }
}

/// Values for a run row about to be inserted as `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub job_id: JobId,
    pub run_date: NaiveDate,
    /// `None` for runs that never reached a date (skips, definition errors).
    pub effective: Option<EffectiveRange>,
    pub attempt: u32,
    pub triggered_by: TriggerSource,
}

/// A persisted run attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: RunId,
    pub job_id: JobId,
    pub run_date: NaiveDate,
    pub effective: Option<EffectiveRange>,
    pub attempt: u32,
    pub status: RunStatus,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub rows_processed: Option<u64>,
    pub error_message: Option<String>,
    pub triggered_by: TriggerSource,
}
