//! Structured filter vocabulary and boundary validation.
//!
//! Callers send `{field, value}` pairs; they are validated once here into
//! tagged variants. Unrecognized field names are ignored (lenient parsing),
//! but a malformed date value is a caller error and is reported.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

/// A validated filter clause. Date bounds are inclusive unix seconds.
/// `DomainContains` applies to visit records only, `FolderContains` to
/// bookmark records only; a store ignores variants that do not apply to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    DateAfter(i64),
    DateBefore(i64),
    DomainContains(String),
    FolderContains(String),
}

/// Wire shape of one filter clause, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFilter {
    pub field: String,
    pub value: String,
}

/// Validate raw clauses into tagged filters. Unknown fields and empty
/// values are dropped; malformed dates fail the whole request.
pub fn parse_filters(raw: &[RawFilter]) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();
    for f in raw {
        let value = f.value.trim();
        if value.is_empty() {
            continue;
        }
        match f.field.as_str() {
            "date_after" => {
                let ts = parse_date_bound(value, false)
                    .with_context(|| format!("Invalid date_after filter: '{}'", value))?;
                filters.push(Filter::DateAfter(ts.timestamp()));
            }
            "date_before" => {
                let ts = parse_date_bound(value, true)
                    .with_context(|| format!("Invalid date_before filter: '{}'", value))?;
                filters.push(Filter::DateBefore(ts.timestamp()));
            }
            "domain" => filters.push(Filter::DomainContains(value.to_string())),
            "folder" => filters.push(Filter::FolderContains(value.to_string())),
            _ => {} // lenient: skip unrecognized fields
        }
    }
    Ok(filters)
}

/// Parse an ISO date or date-time bound. A bare date used as an upper bound
/// means end-of-that-day.
pub fn parse_date_bound(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty date string");
    }
    if s.contains('T') || s.contains(' ') {
        let normalized = s.replace(' ', "T");
        let dt = DateTime::parse_from_rfc3339(&normalized)
            .or_else(|_| DateTime::parse_from_rfc3339(&format!("{normalized}Z")))
            .with_context(|| format!("Invalid date-time: '{}'", s))?;
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: '{}'", s))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap()
    } else {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    };
    Ok(date.and_time(time).and_utc())
}
