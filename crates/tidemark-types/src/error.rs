//! Error types for the tabular data model.

/// Errors raised by [`Table`](crate::Table) operators and [`Value`](crate::Value)
/// accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// `union` was given two tables whose ordered column lists differ.
    #[error(
        "schema mismatch: cannot union columns [{}] with [{}]",
        .left.join(", "),
        .right.join(", ")
    )]
    SchemaMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    /// A typed accessor was called on a value of a different variant.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Aggregate function name not recognised.
    #[error("unknown aggregate function '{0}' (expected sum, avg, min, max or count)")]
    UnknownAggregate(String),

    /// `sum`/`avg` over a column holding non-numeric values.
    #[error("cannot aggregate column '{column}': {found} value is not numeric")]
    NotNumeric { column: String, found: &'static str },

    /// Positional row construction with the wrong number of values.
    #[error("row {row} has {found} value(s) but the table has {expected} column(s)")]
    ArityMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Positional construction with a repeated column name.
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
}

/// Failure to parse a persisted enum string (status, dependency kind, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
