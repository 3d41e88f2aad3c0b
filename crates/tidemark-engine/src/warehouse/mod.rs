//! Warehouse access for source reads and table sink writes.
//!
//! [`Warehouse`] is the seam between steps and the relational store. SQL
//! text is built here once per [`Dialect`]; the backends only bind
//! parameters and decode rows.

pub mod postgres;
pub mod sqlite;

use chrono::NaiveDate;
use pg_escape::quote_identifier;
use tidemark_types::{ColumnType, Table, Value};

use crate::config::types::WriteMode;
use crate::errors::Result;

pub use self::postgres::PostgresWarehouse;
pub use self::sqlite::SqliteWarehouse;

/// Relational store that sources read from and table sinks write to.
pub trait Warehouse: Send + Sync {
    /// Run a date-bounded select and return its rows in effective-date order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ExternalStore`](crate::PipelineError::ExternalStore)
    /// on connection or statement failure.
    fn fetch(&self, query: &SourceQuery) -> Result<Table>;

    /// Create the target if absent, truncate on overwrite, insert every row
    /// in one transaction. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ExternalStore`](crate::PipelineError::ExternalStore)
    /// on connection or statement failure.
    fn write(&self, request: &WriteRequest<'_>) -> Result<u64>;
}

/// A date-bounded read of one table.
#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub date_column: String,
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
    pub filter: Option<String>,
}

impl SourceQuery {
    /// Requested columns with the date column appended when absent.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        if !columns.iter().any(|c| c == &self.date_column) {
            columns.push(self.date_column.clone());
        }
        columns
    }
}

/// A table to persist at `schema.table`.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub data: &'a Table,
    pub mode: WriteMode,
}

/// Build a schema-qualified table name: `"schema"."table"`.
pub(crate) fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

// ---------------------------------------------------------------------------
// SQL generation
// ---------------------------------------------------------------------------

/// Placeholder syntax differences between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn date_param(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}::date"),
            Self::Sqlite => format!("?{n}"),
        }
    }

    /// Left-hand side of the date bounds. Sqlite stores dates as text, so a
    /// timestamp column is truncated to its calendar date before comparing.
    fn date_operand(self, column: &str) -> String {
        match self {
            Self::Postgres => column.to_string(),
            Self::Sqlite => format!("date({column})"),
        }
    }

    /// Insert placeholder for the `n`th parameter of a column of type `ty`.
    /// Postgres binds every value as text and casts server-side.
    pub(crate) fn insert_param(self, n: usize, ty: ColumnType) -> String {
        match self {
            Self::Postgres => format!("${n}::text::{}", ty.sql_name()),
            Self::Sqlite => format!("?{n}"),
        }
    }
}

/// `SELECT ... WHERE dc >= min AND dc <= max [AND (filter)] ORDER BY dc`.
///
/// Both bounds are inclusive calendar dates.
///
/// `projections` are the already-rendered select-list entries so backends
/// can wrap individual columns in casts.
pub(crate) fn select_sql(dialect: Dialect, query: &SourceQuery, projections: &[String]) -> String {
    let date_column = quote_identifier(&query.date_column);
    let bounded = dialect.date_operand(&date_column);
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {bounded} >= {} AND {bounded} <= {}",
        projections.join(", "),
        qualified_name(&query.schema, &query.table),
        dialect.date_param(1),
        dialect.date_param(2),
    );
    if let Some(filter) = query.filter.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        sql.push_str(" AND (");
        sql.push_str(filter);
        sql.push(')');
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&date_column);
    sql
}

pub(crate) fn create_table_sql(qualified: &str, plan: &WritePlan) -> String {
    let column_defs = plan
        .columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {qualified} ({column_defs})")
}

pub(crate) fn column_list(plan: &WritePlan) -> String {
    plan.columns
        .iter()
        .map(|(name, _)| quote_identifier(name).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Write planning
// ---------------------------------------------------------------------------

/// Column types and row values ready for DDL and insertion.
///
/// Text that parses as a date or timestamp is re-typed before inference so
/// round-tripped temporal columns land as native types.
#[derive(Debug)]
pub(crate) struct WritePlan {
    pub(crate) columns: Vec<(String, ColumnType)>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl WritePlan {
    pub(crate) fn new(table: &Table) -> Self {
        let rows: Vec<Vec<Value>> = table
            .rows()
            .iter()
            .map(|row| {
                table
                    .columns()
                    .iter()
                    .map(|c| row.get(c).clone().coerce_temporal())
                    .collect()
            })
            .collect();

        let columns = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let ty = rows
                    .iter()
                    .find_map(|r| ColumnType::of(&r[i]))
                    .unwrap_or(ColumnType::Text);
                (name.clone(), ty)
            })
            .collect();

        Self { columns, rows }
    }

    pub(crate) fn is_empty_schema(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::Row;

    fn query() -> SourceQuery {
        SourceQuery {
            schema: "raw".into(),
            table: "trades".into(),
            columns: vec!["id".into(), "amount".into()],
            date_column: "as_of".into(),
            min_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            max_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            filter: None,
        }
    }

    #[test]
    fn output_columns_append_date_column_once() {
        let mut q = query();
        assert_eq!(q.output_columns(), vec!["id", "amount", "as_of"]);
        q.columns.push("as_of".into());
        assert_eq!(q.output_columns(), vec!["id", "amount", "as_of"]);
    }

    #[test]
    fn postgres_select_casts_bounds() {
        let mut q = query();
        q.filter = Some(" amount > 0 ".into());
        let sql = select_sql(Dialect::Postgres, &q, &["id".into(), "amount".into()]);
        assert_eq!(
            sql,
            "SELECT id, amount FROM raw.trades WHERE as_of >= $1::date AND as_of <= $2::date \
             AND (amount > 0) ORDER BY as_of"
        );
    }

    #[test]
    fn sqlite_select_uses_numbered_params_and_skips_blank_filter() {
        let mut q = query();
        q.filter = Some("   ".into());
        let sql = select_sql(Dialect::Sqlite, &q, &["id".into()]);
        assert_eq!(
            sql,
            "SELECT id FROM raw.trades WHERE date(as_of) >= ?1 AND date(as_of) <= ?2 \
             ORDER BY as_of"
        );
    }

    #[test]
    fn write_plan_coerces_temporal_text() {
        let mut row = Row::new();
        row.set("as_of", "2024-05-01");
        row.set("qty", Value::Null);
        let mut second = Row::new();
        second.set("as_of", "2024-05-02");
        second.set("qty", 4_i64);
        let table = Table::new(["as_of", "qty"], vec![row, second]);

        let plan = WritePlan::new(&table);
        assert_eq!(plan.columns[0].1, ColumnType::Date);
        assert_eq!(plan.columns[1].1, ColumnType::BigInt);
        assert!(matches!(plan.rows[0][0], Value::Date(_)));
        assert_eq!(
            create_table_sql(&qualified_name("curated", "t"), &plan),
            "CREATE TABLE IF NOT EXISTS curated.t (as_of DATE, qty BIGINT)"
        );
    }

    #[test]
    fn insert_params_per_dialect() {
        assert_eq!(Dialect::Postgres.insert_param(3, ColumnType::Numeric), "$3::text::NUMERIC");
        assert_eq!(Dialect::Sqlite.insert_param(3, ColumnType::Numeric), "?3");
    }
}
