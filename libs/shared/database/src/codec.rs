//! Column encodings shared by the repositories.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings with millisecond precision so that
//! lexical order in SQL matches chronological order.

use std::error::Error as StdError;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn encode_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn encode_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

fn conversion_error<E>(error: E) -> rusqlite::Error
where
    E: StdError + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
}

pub fn get_uuid(row: &Row<'_>, column: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).map_err(conversion_error)
}

pub fn get_opt_uuid(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| Uuid::parse_str(&value).map_err(conversion_error))
        .transpose()
}

pub fn get_date(row: &Row<'_>, column: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(column)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(conversion_error)
}

pub fn get_time(row: &Row<'_>, column: &str) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(column)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(conversion_error)
}

pub fn get_opt_time(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<NaiveTime>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| NaiveTime::parse_from_str(&value, TIME_FORMAT).map_err(conversion_error))
        .transpose()
}

pub fn get_ts(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_ts(&raw)
}

pub fn get_opt_ts(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| parse_ts(&value)).transpose()
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(conversion_error)
}

/// Reads a text column into any enum whose `FromStr` error is a proper error type.
pub fn get_enum<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(conversion_error)
}

pub fn get_json<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| serde_json::from_str(&value).map_err(conversion_error))
        .transpose()
}
