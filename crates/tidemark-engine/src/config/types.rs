//! Job definition and step configuration types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Effective-date column selected by sources when none is configured.
pub const DEFAULT_DATE_COLUMN: &str = "as_of";

/// Top-level job definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    #[serde(alias = "jobName")]
    pub name: String,
    /// Step documents, each tagged on `type`. Kept untyped until the
    /// factory builds them so an unknown type is reported per step.
    #[serde(alias = "modules")]
    pub steps: Vec<serde_json::Value>,
    /// Start of gap-fill for a job that has never succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_effective_date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

/// Step type named by a document's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Source,
    Query,
    TableSink,
    CsvSink,
    ColumnarFileSink,
    Extension,
}

impl StepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Query => "Query",
            Self::TableSink => "TableSink",
            Self::CsvSink => "CsvSink",
            Self::ColumnarFileSink => "ColumnarFileSink",
            Self::Extension => "Extension",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Source" | "DataSourcing" => Ok(Self::Source),
            "Query" | "Transformation" => Ok(Self::Query),
            "TableSink" | "DataFrameWriter" => Ok(Self::TableSink),
            "CsvSink" | "CsvFileWriter" => Ok(Self::CsvSink),
            "ColumnarFileSink" | "ParquetFileWriter" => Ok(Self::ColumnarFileSink),
            "Extension" | "External" => Ok(Self::Extension),
            other => Err(PipelineError::config(format!("unknown step type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

/// Sink write behaviour. Required on every sink; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    #[serde(alias = "overwrite")]
    Overwrite,
    #[serde(alias = "append")]
    Append,
}

/// CSV record terminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    #[serde(rename = "LF", alias = "lf")]
    Lf,
    #[serde(rename = "CRLF", alias = "crlf")]
    Crlf,
}

impl LineEnding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

// ---------------------------------------------------------------------------
// Step configs
// ---------------------------------------------------------------------------

fn default_date_column() -> String {
    DEFAULT_DATE_COLUMN.to_string()
}

fn default_true() -> bool {
    true
}

fn default_num_parts() -> i64 {
    1
}

/// Reads a date-bounded slice of one warehouse table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub result_name: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub min_effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_effective_date: Option<NaiveDate>,
    /// Raw SQL predicate AND-ed onto the date filter.
    #[serde(default, alias = "filter")]
    pub additional_filter: Option<String>,
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

/// Runs SQL over every table in shared state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    pub result_name: String,
    pub sql: String,
}

impl QueryConfig {
    /// Trimmed SQL text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for blank SQL.
    pub fn normalized_sql(&self) -> Result<&str, PipelineError> {
        let sql = self.sql.trim();
        if sql.is_empty() {
            return Err(PipelineError::config("query step SQL must not be empty"));
        }
        Ok(sql)
    }
}

/// Writes a state table into the warehouse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSinkConfig {
    pub source: String,
    pub target_table: String,
    pub write_mode: WriteMode,
    /// Defaults to the curated schema from engine settings.
    #[serde(default)]
    pub target_schema: Option<String>,
}

/// Writes a state table as a delimited text file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSinkConfig {
    pub source: String,
    pub output_file: PathBuf,
    #[serde(default = "default_true")]
    pub include_header: bool,
    /// Line appended after the data; supports `{row_count}`, `{date}` and
    /// `{timestamp}`.
    #[serde(default)]
    pub trailer_format: Option<String>,
    pub write_mode: WriteMode,
    #[serde(default)]
    pub line_ending: LineEnding,
}

/// Writes a state table as N parquet partition files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarFileSinkConfig {
    pub source: String,
    pub output_directory: PathBuf,
    /// Values below 1 are treated as 1.
    #[serde(default = "default_num_parts")]
    pub num_parts: i64,
    pub write_mode: WriteMode,
}

impl ColumnarFileSinkConfig {
    #[must_use]
    pub fn partitions(&self) -> usize {
        usize::try_from(self.num_parts.max(1)).unwrap_or(1)
    }
}

/// Delegates to a user-supplied step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfig {
    /// Registered module name, or path to an executable.
    #[serde(alias = "assemblyPath")]
    pub module: String,
    pub type_name: String,
}

/// A step document decoded into its typed configuration.
#[derive(Debug, Clone)]
pub enum StepConfig {
    Source(SourceConfig),
    Query(QueryConfig),
    TableSink(TableSinkConfig),
    CsvSink(CsvSinkConfig),
    ColumnarFileSink(ColumnarFileSinkConfig),
    Extension(ExtensionConfig),
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: StepKind,
    document: &serde_json::Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(document.clone())
        .map_err(|e| PipelineError::config(format!("invalid {kind} step: {e}")))
}

impl StepConfig {
    /// Dispatch on the document's `type` field and decode the rest.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `type` is absent, unknown, or the
    /// remaining fields don't match that step's configuration.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, PipelineError> {
        let kind: StepKind = document
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PipelineError::config("step is missing the required 'type' field"))?
            .parse()?;

        Ok(match kind {
            StepKind::Source => Self::Source(decode(kind, document)?),
            StepKind::Query => Self::Query(decode(kind, document)?),
            StepKind::TableSink => Self::TableSink(decode(kind, document)?),
            StepKind::CsvSink => Self::CsvSink(decode(kind, document)?),
            StepKind::ColumnarFileSink => Self::ColumnarFileSink(decode(kind, document)?),
            StepKind::Extension => Self::Extension(decode(kind, document)?),
        })
    }

    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Source(_) => StepKind::Source,
            Self::Query(_) => StepKind::Query,
            Self::TableSink(_) => StepKind::TableSink,
            Self::CsvSink(_) => StepKind::CsvSink,
            Self::ColumnarFileSink(_) => StepKind::ColumnarFileSink,
            Self::Extension(_) => StepKind::Extension,
        }
    }
}
