//! Structural composite keys for `distinct`, `group_by` and `join`.
//!
//! Keys are tuples of normalized parts, so `("a,b", "c")` and `("a", "b,c")`
//! never collide the way delimiter-joined strings would.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};

use crate::row::Row;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern with `-0.0` folded into `0.0`.
    Float(u64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Boolean(b) => Self::Bool(*b),
            Value::Int32(v) => Self::Int(i64::from(*v)),
            Value::Int64(v) => Self::Int(*v),
            Value::Float64(v) => {
                let v = if *v == 0.0 { 0.0 } else { *v };
                Self::Float(v.to_bits())
            }
            Value::Decimal(d) => Self::Decimal(d.normalized()),
            Value::Text(s) => Self::Text(s.clone()),
            Value::Date(d) => Self::Date(*d),
            Value::Timestamp(ts) => Self::Timestamp(*ts),
        }
    }
}

pub(crate) type Key = Vec<KeyPart>;

pub(crate) fn row_key<S: AsRef<str>>(row: &Row, columns: &[S]) -> Key {
    columns
        .iter()
        .map(|c| KeyPart::from(row.get(c.as_ref())))
        .collect()
}
