//! SQLite warehouse for local development and tests.
//!
//! Every schema is its own database file `<root>/<schema>.db`, attached
//! under the schema name to a fresh in-memory connection per operation, so
//! `"schema"."table"` resolves the same way it does on PostgreSQL.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use pg_escape::quote_identifier;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tidemark_types::value::{DATE_FORMAT, TIMESTAMP_FORMAT};
use tidemark_types::{Row, Table, Value};

use super::{
    column_list, create_table_sql, qualified_name, select_sql, Dialect, SourceQuery, Warehouse,
    WritePlan, WriteRequest,
};
use crate::config::types::WriteMode;
use crate::errors::{PipelineError, Result};

/// Column decoding chosen from the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Integer,
    BigInt,
    Real,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Dynamic,
}

fn resolve(decl_type: Option<&str>) -> Decode {
    let Some(decl) = decl_type else {
        return Decode::Dynamic;
    };
    match decl.trim().to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" | "SMALLINT" => Decode::Integer,
        "BIGINT" => Decode::BigInt,
        "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => Decode::Real,
        d if d.starts_with("NUMERIC") || d.starts_with("DECIMAL") => Decode::Numeric,
        "BOOLEAN" | "BOOL" => Decode::Boolean,
        "DATE" => Decode::Date,
        "TIMESTAMP" | "DATETIME" => Decode::Timestamp,
        _ => Decode::Dynamic,
    }
}

fn dynamic(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            Value::Text(String::from_utf8_lossy(t).into_owned())
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_value(value: ValueRef<'_>, decode: Decode) -> Value {
    match (decode, value) {
        (_, ValueRef::Null) => Value::Null,
        (Decode::Integer, ValueRef::Integer(i)) => {
            i32::try_from(i).map_or(Value::Int64(i), Value::Int32)
        }
        (Decode::Real, ValueRef::Integer(i)) => Value::Float64(i as f64),
        (Decode::Numeric, ValueRef::Integer(i)) => Value::Decimal(BigDecimal::from(i)),
        (Decode::Numeric, ValueRef::Real(f)) => BigDecimal::from_str(&f.to_string())
            .map_or(Value::Float64(f), Value::Decimal),
        (Decode::Numeric, ValueRef::Text(t)) => {
            let text = String::from_utf8_lossy(t);
            BigDecimal::from_str(text.trim())
                .map_or_else(|_| Value::Text(text.into_owned()), Value::Decimal)
        }
        (Decode::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
        (Decode::Date | Decode::Timestamp, ValueRef::Text(t)) => {
            let text = String::from_utf8_lossy(t);
            parse_temporal(decode, text.trim()).unwrap_or_else(|| Value::Text(text.into_owned()))
        }
        (_, other) => dynamic(other),
    }
}

fn parse_temporal(decode: Decode, text: &str) -> Option<Value> {
    if decode == Decode::Date {
        if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
            return Some(Value::Date(date));
        }
    }
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(Value::Timestamp)
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .map(Value::Date)
        })
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int32(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int64(v) => SqlValue::Integer(*v),
        Value::Float64(v) => SqlValue::Real(*v),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Decimal(_) | Value::Text(_) | Value::Date(_) | Value::Timestamp(_) => {
            SqlValue::Text(value.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Warehouse
// ---------------------------------------------------------------------------

/// Warehouse over a directory of SQLite files, one per schema.
pub struct SqliteWarehouse {
    root: PathBuf,
}

impl SqliteWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Database file backing `schema`.
    #[must_use]
    pub fn schema_path(&self, schema: &str) -> PathBuf {
        self.root.join(format!("{schema}.db"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn connect(&self, schema: &str) -> Result<Connection> {
        std::fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(&self.root, e))?;
        let conn = Connection::open_in_memory()
            .map_err(|e| PipelineError::external("warehouse connect", e))?;
        let path = self.schema_path(schema);
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_identifier(schema)),
            [path.to_string_lossy()],
        )
        .map_err(|e| PipelineError::external(format!("attach {}", path.display()), e))?;
        Ok(conn)
    }
}

impl Warehouse for SqliteWarehouse {
    fn fetch(&self, query: &SourceQuery) -> Result<Table> {
        let conn = self.connect(&query.schema)?;
        let columns = query.output_columns();
        let projections: Vec<String> = columns
            .iter()
            .map(|c| quote_identifier(c).to_string())
            .collect();
        let sql = select_sql(Dialect::Sqlite, query, &projections);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| PipelineError::external(format!("prepare {sql}"), e))?;
        let decoders: Vec<Decode> = stmt
            .columns()
            .iter()
            .map(|c| resolve(c.decl_type()))
            .collect();

        let min = query.min_date.format(DATE_FORMAT).to_string();
        let max = query.max_date.format(DATE_FORMAT).to_string();
        let mut result = stmt
            .query([min, max])
            .map_err(|e| PipelineError::external(format!("select from {}", query.table), e))?;

        let mut rows = Vec::new();
        while let Some(sql_row) = result
            .next()
            .map_err(|e| PipelineError::external(format!("read {}", query.table), e))?
        {
            let mut row = Row::new();
            for (idx, (name, decode)) in columns.iter().zip(&decoders).enumerate() {
                let raw = sql_row
                    .get_ref(idx)
                    .map_err(|e| PipelineError::external(format!("decode column {name}"), e))?;
                row.set(name.clone(), decode_value(raw, *decode));
            }
            rows.push(row);
        }

        tracing::debug!(
            schema = %query.schema,
            table = %query.table,
            rows = rows.len(),
            "fetched source rows"
        );
        Ok(Table::new(columns, rows))
    }

    fn write(&self, request: &WriteRequest<'_>) -> Result<u64> {
        let plan = WritePlan::new(request.data);
        if plan.is_empty_schema() {
            return Ok(0);
        }
        let qualified = qualified_name(request.schema, request.table);

        let mut conn = self.connect(request.schema)?;
        let tx = conn
            .transaction()
            .map_err(|e| PipelineError::external("begin transaction", e))?;

        tx.execute_batch(&create_table_sql(&qualified, &plan))
            .map_err(|e| PipelineError::external(format!("create {qualified}"), e))?;

        if request.mode == WriteMode::Overwrite {
            tx.execute_batch(&format!("DELETE FROM {qualified}"))
                .map_err(|e| PipelineError::external(format!("truncate {qualified}"), e))?;
        }

        let placeholders = plan
            .columns
            .iter()
            .enumerate()
            .map(|(i, (_, ty))| Dialect::Sqlite.insert_param(i + 1, *ty))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {qualified} ({}) VALUES ({placeholders})",
            column_list(&plan)
        );

        let mut total_rows: u64 = 0;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| PipelineError::external(format!("prepare {sql}"), e))?;
            for values in &plan.rows {
                stmt.execute(params_from_iter(values.iter().map(to_sql_value)))
                    .map_err(|e| {
                        let context = format!("insert into {qualified}, row {total_rows}");
                        PipelineError::external(context, e)
                    })?;
                total_rows += 1;
            }
        }

        tx.commit()
            .map_err(|e| PipelineError::external(format!("commit {qualified}"), e))?;

        tracing::info!(table = %qualified, rows = total_rows, "wrote warehouse table");
        Ok(total_rows)
    }
}
