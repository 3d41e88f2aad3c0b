//! Grouped aggregation over a [`Table`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};

use crate::error::TableError;
use crate::key::row_key;
use crate::row::Row;
use crate::table::Table;
use crate::value::Value;

/// Aggregate function applied per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl Aggregate {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Output column name, e.g. `sum(amount)`.
    #[must_use]
    pub fn output_column(self, column: &str) -> String {
        format!("{}({column})", self.as_str())
    }

    /// Fold the non-null values of `column` over `rows`.
    ///
    /// `sum` of an empty group is zero; `avg`, `min` and `max` of an empty
    /// group are null.
    fn apply(self, column: &str, rows: &[&Row]) -> Result<Value, TableError> {
        let values = rows.iter().map(|r| r.get(column)).filter(|v| !v.is_null());
        match self {
            Self::Count => Ok(Value::Int64(
                i64::try_from(values.count()).unwrap_or(i64::MAX),
            )),
            Self::Sum => Ok(Value::Decimal(decimal_sum(column, values)?.0)),
            Self::Avg => {
                let (sum, n) = decimal_sum(column, values)?;
                if n == 0 {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Decimal(sum / BigDecimal::from(n)))
                }
            }
            Self::Min => Ok(values.min_by(|a, b| a.compare(b)).cloned().unwrap_or_default()),
            Self::Max => Ok(values.max_by(|a, b| a.compare(b)).cloned().unwrap_or_default()),
        }
    }
}

fn decimal_sum<'a>(
    column: &str,
    values: impl Iterator<Item = &'a Value>,
) -> Result<(BigDecimal, u64), TableError> {
    let mut sum = BigDecimal::zero();
    let mut n = 0u64;
    for value in values {
        let d = value.to_decimal().map_err(|_| TableError::NotNumeric {
            column: column.to_string(),
            found: value.type_name(),
        })?;
        sum += d;
        n += 1;
    }
    Ok((sum, n))
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" | "mean" | "average" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            _ => Err(TableError::UnknownAggregate(s.to_string())),
        }
    }
}

/// A table partitioned by a composite key, awaiting `count` or `agg`.
#[derive(Debug)]
pub struct GroupedTable<'a> {
    table: &'a Table,
    keys: Vec<String>,
}

impl<'a> GroupedTable<'a> {
    pub(crate) fn new(table: &'a Table, keys: Vec<String>) -> Self {
        Self { table, keys }
    }

    /// Groups in first-seen order.
    fn groups(&self) -> Vec<Vec<&'a Row>> {
        let mut slots = HashMap::new();
        let mut groups: Vec<Vec<&'a Row>> = Vec::new();
        for row in self.table.rows() {
            let slot = *slots.entry(row_key(row, &self.keys)).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(row);
        }
        groups
    }

    fn key_row(&self, first: &Row) -> Row {
        self.keys
            .iter()
            .map(|k| (k.clone(), first.get(k).clone()))
            .collect()
    }

    /// One row per group with the key columns and a `count` column.
    #[must_use]
    pub fn count(&self) -> Table {
        let mut columns = self.keys.clone();
        columns.push("count".to_string());
        let rows = self
            .groups()
            .into_iter()
            .map(|members| {
                let mut row = self.key_row(members[0]);
                row.set("count", i64::try_from(members.len()).unwrap_or(i64::MAX));
                row
            })
            .collect();
        Table::new(columns, rows)
    }

    /// One row per group with the key columns and one `fn(col)` column per
    /// requested aggregation.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NotNumeric`] when `sum`/`avg` meet a
    /// non-numeric value.
    pub fn agg<S: AsRef<str>>(&self, aggregations: &[(S, Aggregate)]) -> Result<Table, TableError> {
        let mut columns = self.keys.clone();
        columns.extend(
            aggregations
                .iter()
                .map(|(c, f)| f.output_column(c.as_ref())),
        );

        let mut rows = Vec::new();
        for members in self.groups() {
            let mut row = self.key_row(members[0]);
            for (column, func) in aggregations {
                let column = column.as_ref();
                row.set(func.output_column(column), func.apply(column, &members)?);
            }
            rows.push(row);
        }
        Ok(Table::new(columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Table {
        Table::from_rows(
            ["region", "amount"],
            vec![
                vec!["north".into(), 10.into()],
                vec!["south".into(), 5.into()],
                vec!["north".into(), Value::Null],
                vec!["north".into(), 20.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn count_preserves_first_seen_group_order() {
        let t = sales().group_by(&["region"]).count();
        assert_eq!(t.columns(), ["region", "count"]);
        assert_eq!(t.rows()[0].get("region"), &Value::from("north"));
        assert_eq!(t.rows()[0].get("count"), &Value::Int64(3));
        assert_eq!(t.rows()[1].get("count"), &Value::Int64(1));
    }

    #[test]
    fn agg_skips_nulls() {
        let t = sales()
            .group_by(&["region"])
            .agg(&[
                ("amount", Aggregate::Sum),
                ("amount", Aggregate::Avg),
                ("amount", Aggregate::Count),
                ("amount", Aggregate::Max),
            ])
            .unwrap();
        assert_eq!(
            t.columns(),
            ["region", "sum(amount)", "avg(amount)", "count(amount)", "max(amount)"]
        );
        let north = &t.rows()[0];
        assert_eq!(north.get("sum(amount)"), &Value::Decimal(BigDecimal::from(30)));
        assert_eq!(north.get("avg(amount)"), &Value::Decimal(BigDecimal::from(15)));
        assert_eq!(north.get("count(amount)"), &Value::Int64(2));
        assert_eq!(north.get("max(amount)"), &Value::Int32(20));
    }

    #[test]
    fn sum_rejects_text() {
        let t = Table::from_rows(["k", "v"], vec![vec![1.into(), "oops".into()]]).unwrap();
        let err = t.group_by(&["k"]).agg(&[("v", Aggregate::Sum)]).unwrap_err();
        assert!(matches!(err, TableError::NotNumeric { .. }));
    }

    #[test]
    fn empty_group_aggregates() {
        let t = Table::from_rows(["k", "v"], vec![vec![1.into(), Value::Null]]).unwrap();
        let out = t
            .group_by(&["k"])
            .agg(&[("v", Aggregate::Sum), ("v", Aggregate::Min)])
            .unwrap();
        assert_eq!(out.rows()[0].get("sum(v)"), &Value::Decimal(BigDecimal::zero()));
        assert!(out.rows()[0].get("min(v)").is_null());
    }

    #[test]
    fn aggregate_names_parse() {
        assert_eq!("AVG".parse::<Aggregate>().unwrap(), Aggregate::Avg);
        assert!("median".parse::<Aggregate>().is_err());
    }
}
