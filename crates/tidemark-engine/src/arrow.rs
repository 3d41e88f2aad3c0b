//! Conversion between [`Table`] and Arrow record batches.
//!
//! Arrow types come from the first non-null value of each column (see
//! [`ColumnType::infer`]); every field is nullable.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate};
use datafusion::arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array,
    StringArray, TimestampMicrosecondArray,
};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{
    ArrowPrimitiveType, ArrowTemporalType, DataType, Date32Type, Date64Type, Decimal128Type,
    Field, Float16Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    Schema, SchemaRef, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use datafusion::arrow::util::display::array_value_to_string;
use tidemark_types::{ColumnType, Row, Table, TableError, Value};

use crate::errors::{PipelineError, Result};

/// Widest decimal precision Arrow's 128-bit decimal holds.
const DECIMAL_PRECISION: u8 = 38;

/// Unix epoch date, base for Arrow `Date32` day offsets.
static UNIX_EPOCH_DATE: LazyLock<NaiveDate> =
    LazyLock::new(|| NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is always valid"));

// ---------------------------------------------------------------------------
// Table -> Arrow
// ---------------------------------------------------------------------------

/// Scale wide enough for every fraction digit in the column.
///
/// Fails rather than rounding when the widest integer part plus that scale
/// needs more than [`DECIMAL_PRECISION`] digits.
fn decimal_scale<'a>(column: &str, values: impl Iterator<Item = &'a Value>) -> Result<i8> {
    let mut scale: i64 = 0;
    let mut integer_digits: i64 = 0;
    for value in values.filter(|v| !v.is_null()) {
        let decimal = value.to_decimal()?;
        let (_, exponent) = decimal.as_bigint_and_exponent();
        let digits = i64::try_from(decimal.digits()).unwrap_or(i64::MAX);
        scale = scale.max(exponent);
        integer_digits = integer_digits.max(digits.saturating_sub(exponent));
    }
    let needed = integer_digits.saturating_add(scale);
    if needed > i64::from(DECIMAL_PRECISION) {
        return Err(PipelineError::Table(TableError::TypeMismatch {
            expected: "decimal128",
            found: format!(
                "column {column} needs {needed} digits ({integer_digits} integer, {scale} fraction)"
            ),
        }));
    }
    Ok(i8::try_from(scale).unwrap_or(0))
}

fn arrow_type(ty: ColumnType, scale: i8) -> DataType {
    match ty {
        ColumnType::Integer => DataType::Int32,
        ColumnType::BigInt => DataType::Int64,
        ColumnType::Double => DataType::Float64,
        ColumnType::Numeric => DataType::Decimal128(DECIMAL_PRECISION, scale),
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ColumnType::Text => DataType::Utf8,
    }
}

/// Map each non-null value through `f`, keeping nulls.
fn collect_opt<T>(
    values: &[&Value],
    f: impl Fn(&Value) -> std::result::Result<T, TableError>,
) -> std::result::Result<Vec<Option<T>>, TableError> {
    values
        .iter()
        .map(|v| if v.is_null() { Ok(None) } else { f(v).map(Some) })
        .collect()
}

fn int32(value: &Value) -> std::result::Result<i32, TableError> {
    let wide = value.as_i64()?;
    i32::try_from(wide).map_err(|_| TableError::TypeMismatch {
        expected: "int32",
        found: format!("int64 {wide}"),
    })
}

fn build_array(ty: ColumnType, field: &Field, values: &[&Value]) -> Result<ArrayRef> {
    let array: ArrayRef = match ty {
        ColumnType::Integer => Arc::new(Int32Array::from(collect_opt(values, int32)?)),
        ColumnType::BigInt => Arc::new(Int64Array::from(collect_opt(values, Value::as_i64)?)),
        ColumnType::Double => Arc::new(Float64Array::from(collect_opt(values, Value::to_f64)?)),
        ColumnType::Boolean => Arc::new(BooleanArray::from(collect_opt(values, Value::as_bool)?)),
        ColumnType::Date => Arc::new(Date32Array::from(collect_opt(values, |v| {
            let date = v.clone().coerce_temporal().as_date()?;
            i32::try_from(date.signed_duration_since(*UNIX_EPOCH_DATE).num_days()).map_err(|_| {
                TableError::TypeMismatch {
                    expected: "date32",
                    found: date.to_string(),
                }
            })
        })?)),
        ColumnType::Timestamp => Arc::new(TimestampMicrosecondArray::from(collect_opt(
            values,
            |v| {
                let ts = v.clone().coerce_temporal().as_timestamp()?;
                Ok(ts.and_utc().timestamp_micros())
            },
        )?)),
        ColumnType::Numeric => {
            let text = StringArray::from(collect_opt(values, |v| {
                v.to_decimal().map(|d| d.to_plain_string())
            })?);
            let options = CastOptions {
                safe: false,
                ..CastOptions::default()
            };
            cast_with_options(&text, field.data_type(), &options)
                .map_err(|e| PipelineError::Query(e.into()))?
        }
        ColumnType::Text => Arc::new(StringArray::from(
            values
                .iter()
                .map(|v| (!v.is_null()).then(|| v.to_string()))
                .collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

/// Arrow schema for a table, inferring each column's type.
///
/// # Errors
///
/// Returns [`PipelineError::Table`] when a numeric column holds a
/// non-numeric value.
pub fn table_schema(table: &Table) -> Result<SchemaRef> {
    Ok(typed_fields(table)?.0)
}

fn typed_fields(table: &Table) -> Result<(SchemaRef, Vec<ColumnType>)> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut types = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let ty = ColumnType::infer(table, column);
        let scale = if ty == ColumnType::Numeric {
            decimal_scale(column, table.column_values(column))?
        } else {
            0
        };
        fields.push(Field::new(column, arrow_type(ty, scale), true));
        types.push(ty);
    }
    Ok((Arc::new(Schema::new(fields)), types))
}

/// Convert a table into a single record batch.
///
/// # Errors
///
/// Returns [`PipelineError::Table`] when a value doesn't fit its column's
/// inferred type.
pub fn table_to_batch(table: &Table) -> Result<RecordBatch> {
    let (schema, types) = typed_fields(table)?;
    let mut arrays = Vec::with_capacity(types.len());
    for ((column, ty), field) in table.columns().iter().zip(&types).zip(schema.fields()) {
        let values: Vec<&Value> = table.column_values(column).collect();
        arrays.push(build_array(*ty, field, &values)?);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(table.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
        .map_err(|e| PipelineError::Query(e.into()))
}

// ---------------------------------------------------------------------------
// Arrow -> Table
// ---------------------------------------------------------------------------

fn primitive_values<T, F>(array: &dyn Array, f: F) -> Vec<Value>
where
    T: ArrowPrimitiveType,
    F: Fn(T::Native) -> Value,
{
    let typed = array.as_primitive::<T>();
    (0..typed.len())
        .map(|i| if typed.is_null(i) { Value::Null } else { f(typed.value(i)) })
        .collect()
}

fn timestamp_values<T>(array: &dyn Array) -> Vec<Value>
where
    T: ArrowTemporalType,
    i64: From<T::Native>,
{
    let typed = array.as_primitive::<T>();
    (0..typed.len())
        .map(|i| {
            if typed.is_null(i) {
                Value::Null
            } else {
                typed.value_as_datetime(i).map_or(Value::Null, Value::Timestamp)
            }
        })
        .collect()
}

fn text_values<'a>(len: usize, get: impl Fn(usize) -> Option<&'a str>) -> Vec<Value> {
    (0..len)
        .map(|i| get(i).map_or(Value::Null, |s| Value::Text(s.to_string())))
        .collect()
}

fn array_values(array: &dyn Array) -> Vec<Value> {
    match array.data_type() {
        DataType::Null => vec![Value::Null; array.len()],
        DataType::Boolean => {
            let typed = array.as_boolean();
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Value::Null
                    } else {
                        Value::Boolean(typed.value(i))
                    }
                })
                .collect()
        }
        DataType::Int8 => primitive_values::<Int8Type, _>(array, |v| Value::Int32(i32::from(v))),
        DataType::Int16 => primitive_values::<Int16Type, _>(array, |v| Value::Int32(i32::from(v))),
        DataType::Int32 => primitive_values::<Int32Type, _>(array, Value::Int32),
        DataType::Int64 => primitive_values::<Int64Type, _>(array, Value::Int64),
        DataType::UInt8 => primitive_values::<UInt8Type, _>(array, |v| Value::Int32(i32::from(v))),
        DataType::UInt16 => {
            primitive_values::<UInt16Type, _>(array, |v| Value::Int32(i32::from(v)))
        }
        DataType::UInt32 => {
            primitive_values::<UInt32Type, _>(array, |v| Value::Int64(i64::from(v)))
        }
        DataType::UInt64 => primitive_values::<UInt64Type, _>(array, |v| {
            i64::try_from(v).map_or_else(|_| Value::Decimal(BigDecimal::from(v)), Value::Int64)
        }),
        DataType::Float16 => {
            primitive_values::<Float16Type, _>(array, |v| Value::Float64(f64::from(v)))
        }
        DataType::Float32 => {
            primitive_values::<Float32Type, _>(array, |v| Value::Float64(f64::from(v)))
        }
        DataType::Float64 => primitive_values::<Float64Type, _>(array, Value::Float64),
        DataType::Decimal128(_, _) => {
            let typed = array.as_primitive::<Decimal128Type>();
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        return Value::Null;
                    }
                    let text = typed.value_as_string(i);
                    BigDecimal::from_str(&text).map_or(Value::Text(text), Value::Decimal)
                })
                .collect()
        }
        DataType::Utf8 => {
            let typed = array.as_string::<i32>();
            text_values(typed.len(), |i| (!typed.is_null(i)).then(|| typed.value(i)))
        }
        DataType::LargeUtf8 => {
            let typed = array.as_string::<i64>();
            text_values(typed.len(), |i| (!typed.is_null(i)).then(|| typed.value(i)))
        }
        DataType::Utf8View => {
            let typed = array.as_string_view();
            text_values(typed.len(), |i| (!typed.is_null(i)).then(|| typed.value(i)))
        }
        DataType::Date32 => primitive_values::<Date32Type, _>(array, |days| {
            UNIX_EPOCH_DATE
                .checked_add_signed(chrono::Duration::days(i64::from(days)))
                .map_or(Value::Null, Value::Date)
        }),
        DataType::Date64 => primitive_values::<Date64Type, _>(array, |millis| {
            DateTime::from_timestamp_millis(millis)
                .map_or(Value::Null, |dt| Value::Date(dt.date_naive()))
        }),
        DataType::Timestamp(TimeUnit::Second, _) => timestamp_values::<TimestampSecondType>(array),
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            timestamp_values::<TimestampMillisecondType>(array)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            timestamp_values::<TimestampMicrosecondType>(array)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            timestamp_values::<TimestampNanosecondType>(array)
        }
        _ => (0..array.len())
            .map(|i| {
                if array.is_null(i) {
                    Value::Null
                } else {
                    array_value_to_string(array, i).map_or(Value::Null, Value::Text)
                }
            })
            .collect(),
    }
}

/// Convert record batches back into a table with the schema's column order.
#[must_use]
pub fn batches_to_table(schema: &Schema, batches: &[RecordBatch]) -> Table {
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let mut rows: Vec<Row> = Vec::with_capacity(total);

    for batch in batches {
        let mut batch_rows: Vec<Row> = (0..batch.num_rows()).map(|_| Row::new()).collect();
        for (name, array) in columns.iter().zip(batch.columns()) {
            for (row, value) in batch_rows.iter_mut().zip(array_values(array.as_ref())) {
                row.set(name.clone(), value);
            }
        }
        rows.extend(batch_rows);
    }

    Table::new(columns, rows)
}
