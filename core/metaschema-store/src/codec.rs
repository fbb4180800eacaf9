//! Column decoding helpers shared by the record modules.

use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Reads a TEXT column and parses it (ids, enums).
pub fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| conversion_error(idx, format!("'{raw}': {e}")))
}

pub fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|e: T::Err| conversion_error(idx, format!("'{raw}': {e}")))
    })
    .transpose()
}

/// Reads a JSON TEXT column.
pub fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

pub fn version_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion_error(idx, e.to_string()))
}
