//! PostgreSQL warehouse over the synchronous `postgres` driver.
//!
//! A connection is opened per operation and dropped when it completes.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use pg_escape::quote_identifier;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row as PgRow};
use tidemark_types::{Row, Table, Value};

use super::{
    column_list, create_table_sql, qualified_name, select_sql, Dialect, SourceQuery, Warehouse,
    WritePlan, WriteRequest,
};
use crate::config::types::WriteMode;
use crate::errors::{PipelineError, Result};

/// Maximum rows per multi-value INSERT statement.
const CHUNK_SIZE: usize = 1000;

/// Bind parameter ceiling of the wire protocol.
const MAX_PARAMS: usize = 65_535;

// ---------------------------------------------------------------------------
// Type registry
// ---------------------------------------------------------------------------

/// How a result column is decoded into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Date,
    Timestamp,
    TimestampTz,
    Text,
    /// Selected as `col::text` and parsed as a decimal.
    Numeric,
}

/// Resolved type information for a PostgreSQL column type.
#[derive(Debug, Clone, Copy)]
struct TypeInfo {
    decode: Decode,
    /// Whether the SELECT should cast this column to text (`col::text AS col`).
    needs_cast: bool,
}

/// Resolve a PostgreSQL type name to its decoding and cast requirement.
fn resolve(pg_type: &str) -> TypeInfo {
    let native = |decode| TypeInfo {
        decode,
        needs_cast: false,
    };
    match pg_type {
        "int2" | "smallint" => native(Decode::Int16),
        "int4" | "integer" => native(Decode::Int32),
        "int8" | "bigint" => native(Decode::Int64),
        "float4" | "real" => native(Decode::Float32),
        "float8" | "double precision" => native(Decode::Float64),
        "bool" | "boolean" => native(Decode::Bool),
        "date" => native(Decode::Date),
        "timestamp" => native(Decode::Timestamp),
        "timestamptz" => native(Decode::TimestampTz),
        "text" | "varchar" | "bpchar" | "name" | "char" => native(Decode::Text),
        "numeric" => TypeInfo {
            decode: Decode::Numeric,
            needs_cast: true,
        },
        // uuid, json, interval, arrays, ... -- everything else as text
        _ => TypeInfo {
            decode: Decode::Text,
            needs_cast: true,
        },
    }
}

fn decode_value(
    row: &PgRow,
    idx: usize,
    decode: Decode,
) -> std::result::Result<Value, postgres::Error> {
    Ok(match decode {
        Decode::Int16 => row.try_get::<_, Option<i16>>(idx)?.map(i32::from).into(),
        Decode::Int32 => row.try_get::<_, Option<i32>>(idx)?.into(),
        Decode::Int64 => row.try_get::<_, Option<i64>>(idx)?.into(),
        Decode::Float32 => row.try_get::<_, Option<f32>>(idx)?.map(f64::from).into(),
        Decode::Float64 => row.try_get::<_, Option<f64>>(idx)?.into(),
        Decode::Bool => row.try_get::<_, Option<bool>>(idx)?.into(),
        Decode::Date => row.try_get::<_, Option<NaiveDate>>(idx)?.into(),
        Decode::Timestamp => row.try_get::<_, Option<NaiveDateTime>>(idx)?.into(),
        Decode::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|ts| ts.naive_utc())
            .into(),
        Decode::Text => row.try_get::<_, Option<String>>(idx)?.into(),
        Decode::Numeric => match row.try_get::<_, Option<String>>(idx)? {
            None => Value::Null,
            // NaN has no decimal representation; keep the text.
            Some(text) => BigDecimal::from_str(&text).map_or(Value::Text(text), Value::Decimal),
        },
    })
}

// ---------------------------------------------------------------------------
// Warehouse
// ---------------------------------------------------------------------------

/// Warehouse backed by a PostgreSQL database.
pub struct PostgresWarehouse {
    connstr: String,
}

impl PostgresWarehouse {
    /// Does not connect; every operation opens its own connection.
    pub fn new(connstr: impl Into<String>) -> Self {
        Self {
            connstr: connstr.into(),
        }
    }

    fn connect(&self) -> Result<Client> {
        Client::connect(&self.connstr, NoTls)
            .map_err(|e| PipelineError::external("warehouse connect", e))
    }
}

impl Warehouse for PostgresWarehouse {
    fn fetch(&self, query: &SourceQuery) -> Result<Table> {
        let mut client = self.connect()?;
        let columns = query.output_columns();

        // Prepare once with bare identifiers to learn the result types.
        let plain: Vec<String> = columns
            .iter()
            .map(|c| quote_identifier(c).to_string())
            .collect();
        let plain_sql = select_sql(Dialect::Postgres, query, &plain);
        let plain_statement = client
            .prepare(&plain_sql)
            .map_err(|e| PipelineError::external(format!("prepare {plain_sql}"), e))?;

        let infos: Vec<TypeInfo> = plain_statement
            .columns()
            .iter()
            .map(|c| resolve(c.type_().name()))
            .collect();

        let statement = if infos.iter().any(|i| i.needs_cast) {
            let projections: Vec<String> = columns
                .iter()
                .zip(&infos)
                .map(|(c, info)| {
                    let ident = quote_identifier(c);
                    if info.needs_cast {
                        format!("{ident}::text AS {ident}")
                    } else {
                        ident.to_string()
                    }
                })
                .collect();
            let sql = select_sql(Dialect::Postgres, query, &projections);
            client
                .prepare(&sql)
                .map_err(|e| PipelineError::external(format!("prepare {sql}"), e))?
        } else {
            plain_statement
        };

        let pg_rows = client
            .query(&statement, &[&query.min_date, &query.max_date])
            .map_err(|e| {
                PipelineError::external(format!("select from {}.{}", query.schema, query.table), e)
            })?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut row = Row::new();
            for (idx, (name, info)) in columns.iter().zip(&infos).enumerate() {
                let value = decode_value(pg_row, idx, info.decode)
                    .map_err(|e| PipelineError::external(format!("decode column {name}"), e))?;
                row.set(name.clone(), value);
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

        let mut client = self.connect()?;
        let mut tx = client
            .transaction()
            .map_err(|e| PipelineError::external("begin transaction", e))?;

        tx.batch_execute(&create_table_sql(&qualified, &plan))
            .map_err(|e| PipelineError::external(format!("create {qualified}"), e))?;

        if request.mode == WriteMode::Overwrite {
            tx.batch_execute(&format!("TRUNCATE TABLE {qualified}"))
                .map_err(|e| PipelineError::external(format!("truncate {qualified}"), e))?;
        }

        let col_list = column_list(&plan);
        let ncols = plan.columns.len();
        let chunk_size = CHUNK_SIZE.min(MAX_PARAMS / ncols).max(1);
        let mut total_rows: u64 = 0;

        for chunk in plan.rows.chunks(chunk_size) {
            let (sql, params) = insert_statement(&qualified, &col_list, &plan, chunk);
            let param_refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            let chunk_end = total_rows + chunk.len() as u64;
            tx.execute(&sql, &param_refs).map_err(|e| {
                PipelineError::external(
                    format!("insert into {qualified}, rows {total_rows}-{chunk_end}"),
                    e,
                )
            })?;
            total_rows = chunk_end;
        }

        tx.commit()
            .map_err(|e| PipelineError::external(format!("commit {qualified}"), e))?;

        tracing::info!(table = %qualified, rows = total_rows, "wrote warehouse table");
        Ok(total_rows)
    }
}

/// Multi-row INSERT for one chunk. Every value binds as text (`None` for
/// null) and is cast to its column type server-side.
fn insert_statement(
    qualified: &str,
    col_list: &str,
    plan: &WritePlan,
    chunk: &[Vec<Value>],
) -> (String, Vec<Option<String>>) {
    let mut sql = format!("INSERT INTO {qualified} ({col_list}) VALUES ");
    let mut params: Vec<Option<String>> = Vec::with_capacity(chunk.len() * plan.columns.len());

    for (row_idx, values) in chunk.iter().enumerate() {
        if row_idx > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (pos, value) in values.iter().enumerate() {
            if pos > 0 {
                sql.push_str(", ");
            }
            params.push((!value.is_null()).then(|| value.to_string()));
            sql.push_str(&Dialect::Postgres.insert_param(params.len(), plan.columns[pos].1));
        }
        sql.push(')');
    }
    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_exotic_types_are_cast() {
        assert!(resolve("numeric").needs_cast);
        assert_eq!(resolve("numeric").decode, Decode::Numeric);
        assert!(resolve("uuid").needs_cast);
        assert_eq!(resolve("jsonb").decode, Decode::Text);
    }

    #[test]
    fn native_types_are_not_cast() {
        let native = [
            "int2", "int4", "int8", "float8", "bool", "date", "timestamp", "timestamptz", "text",
        ];
        for name in native {
            assert!(!resolve(name).needs_cast, "{name} should decode natively");
        }
    }

    #[test]
    fn insert_numbers_params_across_rows() {
        let table = Table::from_rows(
            ["id", "note"],
            vec![
                vec![Value::Int64(1), Value::from("a")],
                vec![Value::Int64(2), Value::Null],
            ],
        )
        .unwrap();
        let plan = WritePlan::new(&table);
        let (sql, params) = insert_statement("curated.t", &column_list(&plan), &plan, &plan.rows);
        assert_eq!(
            sql,
            "INSERT INTO curated.t (id, note) VALUES \
             ($1::text::BIGINT, $2::text::TEXT), ($3::text::BIGINT, $4::text::TEXT)"
        );
        assert_eq!(
            params,
            vec![Some("1".into()), Some("a".into()), Some("2".into()), None]
        );
    }

    #[test]
    fn new_does_not_connect() {
        let wh = PostgresWarehouse::new("host=/nonexistent user=nobody");
        assert_eq!(wh.connstr, "host=/nonexistent user=nobody");
    }
}
