//! Column type inference shared by every writer that needs a schema.

use std::fmt;

use crate::table::Table;
use crate::value::Value;

/// Storage type of a column, inferred from its first non-null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Text,
}

impl ColumnType {
    /// Type of a single value; `None` for null.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int32(_) => Some(Self::Integer),
            Value::Int64(_) => Some(Self::BigInt),
            Value::Float64(_) => Some(Self::Double),
            Value::Decimal(_) => Some(Self::Numeric),
            Value::Boolean(_) => Some(Self::Boolean),
            Value::Date(_) => Some(Self::Date),
            Value::Timestamp(_) => Some(Self::Timestamp),
            Value::Text(_) => Some(Self::Text),
        }
    }

    /// Infer from the first non-null sample; all-null columns are text.
    #[must_use]
    pub fn infer(table: &Table, column: &str) -> Self {
        table.sample(column).and_then(Self::of).unwrap_or(Self::Text)
    }

    /// SQL type used in `CREATE TABLE`.
    #[must_use]
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Numeric => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_uses_first_non_null_sample() {
        let t = Table::from_rows(
            ["a", "b"],
            vec![
                vec![Value::Null, Value::Null],
                vec![Value::Int64(4), Value::Null],
                vec![Value::from("x"), Value::Null],
            ],
        )
        .unwrap();
        assert_eq!(ColumnType::infer(&t, "a"), ColumnType::BigInt);
        assert_eq!(ColumnType::infer(&t, "b"), ColumnType::Text);
        assert_eq!(ColumnType::infer(&t, "nope"), ColumnType::Text);
    }

    #[test]
    fn sql_names_match_the_type_map() {
        assert_eq!(ColumnType::Integer.sql_name(), "INTEGER");
        assert_eq!(ColumnType::Double.sql_name(), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Timestamp.to_string(), "TIMESTAMP");
    }
}
