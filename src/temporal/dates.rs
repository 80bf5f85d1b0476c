//! Date parsing and extraction from record attributes.
//!
//! A record carries at most one recognized date. The lookup order is the
//! synthetic stored-date field written by the aggregator, then a fixed list
//! of common attribute names, then the first token of a `dates` summary.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Field the aggregator stores each feature's resolved date under.
pub const STORED_DATE_FIELD: &str = "_storedDate";

/// Field holding a cluster's date summary.
pub const DATES_SUMMARY_FIELD: &str = "dates";

/// Attribute names checked for a date, in priority order.
pub const DATE_FIELDS: &[&str] = &[
    "date",
    "created_date",
    "createdDate",
    "created_at",
    "createdAt",
    "reported_date",
    "incident_date",
    "event_date",
    "requested_datetime",
    "opened_date",
    "timestamp",
    "datetime",
    "time",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse a date string in any of the accepted formats.
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a JSON value as a date. Numbers are epoch milliseconds.
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })?;
            DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

/// True if the string parses as a calendar date.
pub fn is_date_shaped(s: &str) -> bool {
    parse_date_str(s).is_some()
}

/// Resolve the date of a record or feature from its attributes.
pub fn extract_date(properties: &Map<String, Value>) -> Option<NaiveDate> {
    if let Some(date) = properties.get(STORED_DATE_FIELD).and_then(parse_date_value) {
        return Some(date);
    }

    if let Some(date) = DATE_FIELDS
        .iter()
        .filter_map(|field| properties.get(*field))
        .find_map(parse_date_value)
    {
        return Some(date);
    }

    properties
        .get(DATES_SUMMARY_FIELD)
        .and_then(Value::as_str)
        .and_then(|summary| {
            summary
                .split(|c: char| c.is_whitespace() || c == ',')
                .find(|token| !token.is_empty())
        })
        .and_then(parse_date_str)
}
