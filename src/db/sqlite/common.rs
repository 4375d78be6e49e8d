use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    Column, Row, Sqlite, TypeInfo, ValueRef,
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
};

use crate::{
    db::error::DbResult,
    models::{RowData, RowId},
    retention::{SqlValue, quote_ident},
};

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Integer(n) => query.bind(*n),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    }
}

pub fn bind_id<'q>(query: SqliteQuery<'q>, id: &RowId) -> SqliteQuery<'q> {
    match id {
        RowId::Integer(n) => query.bind(*n),
        RowId::Uuid(u) => query.bind(u.to_string()),
        RowId::Text(s) => query.bind(s.clone()),
    }
}

/// Age comparison for TEXT timestamp columns, evaluated on instants.
///
/// Values may be in SQLite's own `YYYY-MM-DD HH:MM:SS` form or RFC 3339 with
/// a `T`, an offset and fractional seconds. SQLite's date functions round the
/// fraction to milliseconds, so the fraction is cut from the text before
/// `strftime` sees it and added back as microseconds. Values SQLite cannot
/// parse evaluate to NULL and never match.
pub fn older_than(column: &str, cutoff: DateTime<Utc>) -> (String, SqlValue) {
    let col = quote_ident(column);
    let has_fraction = format!("substr({col}, 20, 1) = '.'");
    let fraction = format!("(CASE WHEN {has_fraction} THEN substr({col}, 21) ELSE '' END)");
    let terminated = ["+", "-", "Z", "z", " "]
        .iter()
        .fold(fraction.clone(), |acc, c| format!("replace({acc}, '{c}', '|')"));
    let digits = format!("substr({fraction}, 1, instr({terminated} || '|', '|') - 1)");
    let whole_seconds = format!(
        "(CASE WHEN {has_fraction} THEN substr({col}, 1, 19) || substr({col}, 21 + length({digits})) ELSE {col} END)"
    );
    let micros = format!(
        "(CAST(strftime('%s', {whole_seconds}) AS INTEGER) * 1000000 \
         + CAST(substr({digits} || '000000', 1, 6) AS INTEGER))"
    );
    (
        format!("{micros} < ?"),
        SqlValue::Integer(cutoff.timestamp_micros()),
    )
}

/// `?, ?, ?` for an IN list of `n` values.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Storage class of the value actually stored, not the declared column type.
fn storage_class(row: &SqliteRow, idx: usize) -> DbResult<Option<String>> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(None);
    }
    Ok(Some(raw.type_info().name().to_string()))
}

pub fn decode_row_id(row: &SqliteRow, idx: usize) -> DbResult<RowId> {
    match storage_class(row, idx)?.as_deref() {
        Some("INTEGER") => Ok(RowId::Integer(row.try_get(idx)?)),
        _ => Ok(RowId::Text(row.try_get(idx)?)),
    }
}

/// Decode every column of a row into JSON values by storage class. Blobs are
/// hex-encoded.
pub fn decode_row(row: &SqliteRow) -> DbResult<RowData> {
    let mut data = RowData::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match storage_class(row, idx)?.as_deref() {
            None => Value::Null,
            Some("INTEGER") => Value::from(row.try_get::<i64, _>(idx)?),
            Some("REAL") => serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some("BLOB") => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(idx)?)),
            Some(_) => Value::String(row.try_get::<String, _>(idx)?),
        };
        data.insert(column.name().to_string(), value);
    }
    Ok(data)
}
