//! Scalar cell values.
//!
//! [`Value`] is the explicit tagged union every table cell, shared-state
//! scalar and query result is expressed in. Conversions between variants are
//! always explicit: accessors return [`TableError::TypeMismatch`] rather than
//! guessing.

use std::cmp::Ordering;
use std::fmt;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Canonical date rendering (`2024-01-31`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical timestamp rendering; fractional seconds only when non-zero.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Short variant name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Decimal(_) => "decimal",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_) | Self::Int64(_) | Self::Float64(_) | Self::Decimal(_)
        )
    }

    fn mismatch(&self, expected: &'static str) -> TableError {
        TableError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// Integer value, widening `Int32`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] for any non-integer variant.
    pub fn as_i64(&self) -> Result<i64, TableError> {
        match self {
            Self::Int32(v) => Ok(i64::from(*v)),
            Self::Int64(v) => Ok(*v),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Floating-point view of any numeric variant.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] for non-numeric variants.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Result<f64, TableError> {
        match self {
            Self::Int32(v) => Ok(f64::from(*v)),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Decimal(d) => d.to_f64().ok_or_else(|| self.mismatch("finite number")),
            other => Err(other.mismatch("number")),
        }
    }

    /// Exact decimal view of any numeric variant.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] for non-numeric variants and for
    /// non-finite floats.
    pub fn to_decimal(&self) -> Result<BigDecimal, TableError> {
        match self {
            Self::Int32(v) => Ok(BigDecimal::from(*v)),
            Self::Int64(v) => Ok(BigDecimal::from(*v)),
            Self::Float64(v) => {
                BigDecimal::from_f64(*v).ok_or_else(|| self.mismatch("finite number"))
            }
            Self::Decimal(d) => Ok(d.clone()),
            other => Err(other.mismatch("number")),
        }
    }

    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] unless the value is `Text`.
    pub fn as_str(&self) -> Result<&str, TableError> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(other.mismatch("text")),
        }
    }

    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] unless the value is `Boolean`.
    pub fn as_bool(&self) -> Result<bool, TableError> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] unless the value is `Date`.
    pub fn as_date(&self) -> Result<NaiveDate, TableError> {
        match self {
            Self::Date(d) => Ok(*d),
            other => Err(other.mismatch("date")),
        }
    }

    /// Timestamp value; dates widen to midnight.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TypeMismatch`] for non-temporal variants.
    pub fn as_timestamp(&self) -> Result<NaiveDateTime, TableError> {
        match self {
            Self::Timestamp(ts) => Ok(*ts),
            Self::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            other => Err(other.mismatch("timestamp")),
        }
    }

    /// Re-type `Text` holding a `yyyy-MM-dd` or `yyyy-MM-dd HH:mm:ss` string
    /// as a native date or timestamp. Every other value is returned as-is.
    #[must_use]
    pub fn coerce_temporal(self) -> Self {
        let Self::Text(text) = &self else {
            return self;
        };
        let trimmed = text.trim();
        if trimmed.len() == 10 {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
                return Self::Date(date);
            }
        }
        if trimmed.len() >= 19 {
            for fmt in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                    return Self::Timestamp(ts);
                }
            }
        }
        self
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int32(_) | Self::Int64(_) | Self::Float64(_) | Self::Decimal(_) => 2,
            Self::Date(_) | Self::Timestamp(_) => 3,
            Self::Text(_) => 4,
        }
    }

    /// Total ordering used by sorting and `min`/`max`.
    ///
    /// Nulls sort first. Numbers compare numerically across integer, float
    /// and decimal variants; dates compare against timestamps at midnight.
    /// Values of unrelated kinds order by kind.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (a, b) if a.rank() == 3 => match (a.as_timestamp(), b.as_timestamp()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => Ordering::Equal,
            },
            (a, b) if a.rank() == 2 => compare_numeric(a, b),
            _ => Ordering::Equal,
        }
    }
}

fn compare_numeric(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            match (a.as_i64(), b.as_i64()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => Ordering::Equal,
            }
        }
        (Value::Decimal(_), _) | (_, Value::Decimal(_)) => {
            match (a.to_decimal(), b.to_decimal()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => float_order(a, b),
            }
        }
        _ => float_order(a, b),
    }
}

fn float_order(a: &Value, b: &Value) -> Ordering {
    match (a.to_f64(), b.to_f64()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => Ordering::Equal,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    i32 => Int32,
    i64 => Int64,
    f64 => Float64,
    bool => Boolean,
    String => Text,
    BigDecimal => Decimal,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn accessors_reject_other_variants() {
        let err = Value::Text("x".into()).as_i64().unwrap_err();
        assert_eq!(
            err,
            TableError::TypeMismatch {
                expected: "integer",
                found: "text"
            }
        );
        assert!(Value::Null.as_bool().is_err());
        assert_eq!(Value::Int32(7).as_i64().unwrap(), 7);
    }

    #[test]
    fn decimal_widening_is_exact() {
        let d = Value::Int64(12).to_decimal().unwrap();
        assert_eq!(d, BigDecimal::from(12));
        assert!(Value::Float64(f64::NAN).to_decimal().is_err());
    }

    #[test]
    fn compare_orders_nulls_first_and_numbers_numerically() {
        let mut values = vec![
            Value::Float64(2.5),
            Value::Null,
            Value::Int32(3),
            Value::Decimal(BigDecimal::from_str("1.25").unwrap()),
            Value::Int64(-4),
        ];
        values.sort_by(Value::compare);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int64(-4),
                Value::Decimal(BigDecimal::from_str("1.25").unwrap()),
                Value::Float64(2.5),
                Value::Int32(3),
            ]
        );
    }

    #[test]
    fn dates_compare_against_timestamps() {
        let d = Value::Date(date("2024-03-01"));
        let ts = Value::Timestamp(date("2024-03-01").and_hms_opt(8, 0, 0).unwrap());
        assert_eq!(d.compare(&ts), Ordering::Less);
    }

    #[test]
    fn display_renders_canonical_text() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Date(date("2024-01-05")).to_string(), "2024-01-05");
        let ts = date("2024-01-05").and_hms_opt(13, 4, 5).unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-01-05 13:04:05");
        assert_eq!(Value::Boolean(true).to_string(), "true");
    }

    #[test]
    fn coerce_temporal_recognises_dates_and_timestamps() {
        assert_eq!(
            Value::from("2024-02-29").coerce_temporal(),
            Value::Date(date("2024-02-29"))
        );
        assert_eq!(
            Value::from("2024-02-29 23:59:01").coerce_temporal(),
            Value::Timestamp(date("2024-02-29").and_hms_opt(23, 59, 1).unwrap())
        );
        assert_eq!(
            Value::from("not a date").coerce_temporal(),
            Value::from("not a date")
        );
        assert_eq!(Value::Int32(1).coerce_temporal(), Value::Int32(1));
    }

    #[test]
    fn serde_uses_adjacent_tagging() {
        let json = serde_json::to_string(&Value::Date(date("2024-01-02"))).unwrap();
        assert_eq!(json, r#"{"type":"date","value":"2024-01-02"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Date(date("2024-01-02")));
    }
}
