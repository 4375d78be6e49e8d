use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{
    Column, Postgres, Row, TypeInfo, ValueRef,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use uuid::Uuid;

use crate::{
    db::error::{DbError, DbResult},
    models::{RowData, RowId},
    retention::SqlValue,
};

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

pub fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Integer(n) => query.bind(*n),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    }
}

pub fn bind_id<'q>(query: PgQuery<'q>, id: &RowId) -> PgQuery<'q> {
    match id {
        RowId::Integer(n) => query.bind(*n),
        RowId::Uuid(u) => query.bind(*u),
        RowId::Text(s) => query.bind(s.clone()),
    }
}

/// Bind `ids` as a single array parameter, for use with `= ANY($n)`.
pub fn bind_id_array<'q>(query: PgQuery<'q>, ids: &[RowId]) -> DbResult<PgQuery<'q>> {
    match ids.first() {
        None | Some(RowId::Integer(_)) => {
            let values = ids
                .iter()
                .map(|id| match id {
                    RowId::Integer(n) => Ok(*n),
                    other => Err(mixed_ids(other)),
                })
                .collect::<DbResult<Vec<i64>>>()?;
            Ok(query.bind(values))
        }
        Some(RowId::Uuid(_)) => {
            let values = ids
                .iter()
                .map(|id| match id {
                    RowId::Uuid(u) => Ok(*u),
                    other => Err(mixed_ids(other)),
                })
                .collect::<DbResult<Vec<Uuid>>>()?;
            Ok(query.bind(values))
        }
        Some(RowId::Text(_)) => {
            let values = ids
                .iter()
                .map(|id| match id {
                    RowId::Text(s) => Ok(s.clone()),
                    other => Err(mixed_ids(other)),
                })
                .collect::<DbResult<Vec<String>>>()?;
            Ok(query.bind(values))
        }
    }
}

fn mixed_ids(id: &RowId) -> DbError {
    DbError::Validation(format!("id '{}' does not match the key type of its batch", id))
}

/// Rewrite `?` placeholders to `$start`, `$start+1`, ... Returns the rewritten
/// SQL and the next free parameter index.
pub fn numbered_placeholders(sql: &str, start: usize) -> (String, usize) {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut idx = start;
    for ch in sql.chars() {
        if ch == '?' {
            out.push_str(&format!("${}", idx));
            idx += 1;
        } else {
            out.push(ch);
        }
    }
    (out, idx)
}

fn type_name(row: &PgRow, idx: usize) -> DbResult<Option<String>> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(None);
    }
    Ok(Some(raw.type_info().name().to_string()))
}

pub fn decode_row_id(row: &PgRow, idx: usize) -> DbResult<RowId> {
    match type_name(row, idx)?.as_deref() {
        Some("INT2") => Ok(RowId::Integer(i64::from(row.try_get::<i16, _>(idx)?))),
        Some("INT4") => Ok(RowId::Integer(i64::from(row.try_get::<i32, _>(idx)?))),
        Some("INT8") => Ok(RowId::Integer(row.try_get(idx)?)),
        Some("UUID") => Ok(RowId::Uuid(row.try_get(idx)?)),
        _ => Ok(RowId::Text(row.try_get(idx)?)),
    }
}

fn float(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Decode every column of a row into JSON values by column type. Types
/// without a mapping decode as text when possible, otherwise as null.
pub fn decode_row(row: &PgRow) -> DbResult<RowData> {
    let mut data = RowData::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match type_name(row, idx)?.as_deref() {
            None => Value::Null,
            Some("BOOL") => Value::Bool(row.try_get(idx)?),
            Some("INT2") => Value::from(row.try_get::<i16, _>(idx)?),
            Some("INT4") => Value::from(row.try_get::<i32, _>(idx)?),
            Some("INT8") => Value::from(row.try_get::<i64, _>(idx)?),
            Some("FLOAT4") => float(f64::from(row.try_get::<f32, _>(idx)?)),
            Some("FLOAT8") => float(row.try_get::<f64, _>(idx)?),
            Some("NUMERIC") => Value::String(row.try_get::<Decimal, _>(idx)?.to_string()),
            Some("UUID") => Value::String(row.try_get::<Uuid, _>(idx)?.to_string()),
            Some("TIMESTAMPTZ") => {
                Value::String(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339())
            }
            Some("TIMESTAMP") => Value::String(row.try_get::<NaiveDateTime, _>(idx)?.to_string()),
            Some("DATE") => Value::String(row.try_get::<NaiveDate, _>(idx)?.to_string()),
            Some("JSON") | Some("JSONB") => row.try_get::<Value, _>(idx)?,
            Some("BYTEA") => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(idx)?)),
            Some(_) => row
                .try_get::<String, _>(idx)
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        data.insert(column.name().to_string(), value);
    }
    Ok(data)
}
