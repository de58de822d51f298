//! Canonical cell values.
//!
//! Every raw cell, whatever runtime produced it, is folded into one
//! [`CanonicalValue`]. Temporal payloads are plain `f64`s measured from the SAS
//! epoch (1960-01-01T00:00:00 UTC): days for dates, seconds for datetimes and
//! elapsed seconds for times. The epoch is a constant; nothing here consults
//! the host clock, zone or locale.
//!
//! Conversion is total. Rules are tried in order:
//!
//! 1. missing markers (null, NaN, NA) become [`CanonicalValue::Missing`];
//! 2. a date/datetime/time display format drives a type-specific coercion;
//! 3. otherwise, or when that coercion produced nothing, the native type decides.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    format::TemporalKind,
    raw::{RawValue, duration_to_seconds, lenient_float},
};

/// 1960-01-01T00:00:00Z expressed as a Unix timestamp.
pub const SAS_EPOCH_UNIX_SECONDS: i64 = -315_619_200;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d%b%Y:%H:%M:%S%.f",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d%b%Y"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CanonicalRepr", into = "CanonicalRepr")]
pub enum CanonicalValue {
    Missing,
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Days since the SAS epoch; may be fractional or negative.
    Date(f64),
    /// Seconds since the SAS epoch.
    DateTime(f64),
    /// Elapsed seconds; may exceed one day.
    Time(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalKind {
    Missing,
    Number,
    String,
    Bytes,
    Date,
    DateTime,
    Time,
}

impl CanonicalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalKind::Missing => "missing",
            CanonicalKind::Number => "number",
            CanonicalKind::String => "string",
            CanonicalKind::Bytes => "bytes",
            CanonicalKind::Date => "date",
            CanonicalKind::DateTime => "datetime",
            CanonicalKind::Time => "time",
        }
    }
}

impl fmt::Display for CanonicalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CanonicalValue {
    pub fn kind(&self) -> CanonicalKind {
        match self {
            CanonicalValue::Missing => CanonicalKind::Missing,
            CanonicalValue::Number(_) => CanonicalKind::Number,
            CanonicalValue::String(_) => CanonicalKind::String,
            CanonicalValue::Bytes(_) => CanonicalKind::Bytes,
            CanonicalValue::Date(_) => CanonicalKind::Date,
            CanonicalValue::DateTime(_) => CanonicalKind::DateTime,
            CanonicalValue::Time(_) => CanonicalKind::Time,
        }
    }

    /// Numeric payload of number and temporal variants.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            CanonicalValue::Number(v)
            | CanonicalValue::Date(v)
            | CanonicalValue::DateTime(v)
            | CanonicalValue::Time(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CanonicalValue::Missing)
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalValue::Missing => f.write_str("missing"),
            CanonicalValue::String(text) => write!(f, "string {text:?}"),
            CanonicalValue::Bytes(bytes) => write!(f, "bytes {bytes:?}"),
            other => match other.numeric() {
                Some(value) => write!(f, "{} {value}", other.kind()),
                None => write!(f, "{}", other.kind()),
            },
        }
    }
}

/// Wire shape: `{"kind": ..., "value": ...}` with `value: null` for missing.
/// Non-finite payloads are spelled `"inf"`, `"-inf"` or `"NaN"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CanonicalRepr {
    kind: CanonicalKind,
    #[serde(default)]
    value: serde_json::Value,
}

impl From<CanonicalValue> for CanonicalRepr {
    fn from(value: CanonicalValue) -> Self {
        let kind = value.kind();
        let value = match value {
            CanonicalValue::Missing => serde_json::Value::Null,
            CanonicalValue::String(text) => serde_json::Value::String(text),
            CanonicalValue::Bytes(bytes) => serde_json::Value::from(bytes),
            CanonicalValue::Number(v)
            | CanonicalValue::Date(v)
            | CanonicalValue::DateTime(v)
            | CanonicalValue::Time(v) => match lenient_float::non_finite_text(v) {
                Some(text) => serde_json::Value::from(text),
                None => serde_json::Value::from(v),
            },
        };
        Self { kind, value }
    }
}

impl TryFrom<CanonicalRepr> for CanonicalValue {
    type Error = String;

    fn try_from(repr: CanonicalRepr) -> Result<Self, Self::Error> {
        let kind = repr.kind;
        let number = || match &repr.value {
            serde_json::Value::Number(number) => number
                .as_f64()
                .ok_or_else(|| format!("{kind} value {number} is out of range")),
            serde_json::Value::String(text) => lenient_float::parse_text(text)
                .ok()
                .filter(|value| !value.is_finite())
                .ok_or_else(|| format!("{kind} value must be a number, got {text:?}")),
            other => Err(format!("{kind} value must be a number, got {other}")),
        };
        Ok(match kind {
            CanonicalKind::Missing => CanonicalValue::Missing,
            CanonicalKind::Number => CanonicalValue::Number(number()?),
            CanonicalKind::Date => CanonicalValue::Date(number()?),
            CanonicalKind::DateTime => CanonicalValue::DateTime(number()?),
            CanonicalKind::Time => CanonicalValue::Time(number()?),
            CanonicalKind::String => match &repr.value {
                serde_json::Value::String(text) => CanonicalValue::String(text.clone()),
                other => return Err(format!("string value must be text, got {other}")),
            },
            CanonicalKind::Bytes => {
                let items = repr
                    .value
                    .as_array()
                    .ok_or_else(|| format!("bytes value must be an array, got {}", repr.value))?;
                let bytes = items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| format!("invalid byte {item}"))
                    })
                    .collect::<Result<Vec<u8>, String>>()?;
                CanonicalValue::Bytes(bytes)
            }
        })
    }
}

/// Canonicalize one raw cell given its column's classifier result.
pub fn canonicalize(value: &RawValue, kind: TemporalKind) -> CanonicalValue {
    if value.is_missing() {
        return CanonicalValue::Missing;
    }
    convert_with_format(value, kind).unwrap_or_else(|| native_fallback(value))
}

fn convert_with_format(value: &RawValue, kind: TemporalKind) -> Option<CanonicalValue> {
    match kind {
        TemporalKind::DateTime => coerce_datetime_seconds(value)
            .or_else(|| value.as_number())
            .map(CanonicalValue::DateTime),
        TemporalKind::Date => coerce_calendar_date(value)
            .map(date_days)
            .or_else(|| value.as_number())
            .map(CanonicalValue::Date),
        TemporalKind::Time => coerce_time_seconds(value)
            .or_else(|| value.as_number())
            .map(CanonicalValue::Time),
        TemporalKind::Unclassified => None,
    }
}

fn native_fallback(value: &RawValue) -> CanonicalValue {
    match value {
        RawValue::Null | RawValue::NotAvailable => CanonicalValue::Missing,
        RawValue::Bytes(bytes) => CanonicalValue::Bytes(bytes.clone()),
        RawValue::Text(text) => CanonicalValue::String(text.clone()),
        RawValue::Timestamp(dt) => CanonicalValue::DateTime(seconds_since_epoch(dt)),
        RawValue::ZonedTimestamp(dt) => CanonicalValue::DateTime(zoned_seconds(dt)),
        RawValue::Date(date) => CanonicalValue::Date(date_days(*date)),
        RawValue::Duration(delta) => CanonicalValue::Time(duration_to_seconds(delta)),
        RawValue::WallTime(time) => CanonicalValue::Time(wall_clock_seconds(time)),
        RawValue::Bool(_)
        | RawValue::Int(_)
        | RawValue::UInt(_)
        | RawValue::Float(_)
        | RawValue::Float32(_) => value
            .as_number()
            .map_or(CanonicalValue::Missing, CanonicalValue::Number),
        RawValue::Decimal(decimal) => match decimal.to_f64() {
            Some(number) => CanonicalValue::Number(number),
            None => CanonicalValue::String(decimal.to_string()),
        },
        RawValue::Other(rendered) => CanonicalValue::String(rendered.clone()),
    }
}

fn coerce_datetime_seconds(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Timestamp(dt) => Some(seconds_since_epoch(dt)),
        RawValue::ZonedTimestamp(dt) => Some(zoned_seconds(dt)),
        RawValue::Text(text) => match parse_zoned_text(text) {
            Some(zoned) => Some(zoned_seconds(&zoned)),
            None => parse_naive_timestamp(text).map(|dt| seconds_since_epoch(&dt)),
        },
        _ => None,
    }
}

// Timestamps keep the calendar date they were presented with.
fn coerce_calendar_date(value: &RawValue) -> Option<NaiveDate> {
    match value {
        RawValue::Timestamp(dt) => Some(dt.date()),
        RawValue::ZonedTimestamp(dt) => Some(dt.date_naive()),
        RawValue::Date(date) => Some(*date),
        RawValue::Text(text) => match parse_zoned_text(text) {
            Some(zoned) => Some(zoned.date_naive()),
            None => parse_naive_timestamp(text).map(|dt| dt.date()),
        },
        _ => None,
    }
}

fn coerce_time_seconds(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Duration(delta) => Some(duration_to_seconds(delta)),
        RawValue::WallTime(time) => Some(wall_clock_seconds(time)),
        RawValue::Text(text) => parse_clock_text(text).or_else(|| {
            text.trim()
                .parse::<f64>()
                .ok()
                .filter(|seconds| !seconds.is_nan())
        }),
        _ => None,
    }
}

/// Seconds from the SAS epoch for a UTC wall-clock timestamp.
pub fn seconds_since_epoch(dt: &NaiveDateTime) -> f64 {
    let utc = dt.and_utc();
    (utc.timestamp() - SAS_EPOCH_UNIX_SECONDS) as f64
        + f64::from(utc.timestamp_subsec_nanos()) / 1_000_000_000.0
}

fn zoned_seconds(dt: &DateTime<FixedOffset>) -> f64 {
    seconds_since_epoch(&dt.naive_utc())
}

/// Days from the SAS epoch, measured at midnight UTC.
pub fn date_days(date: NaiveDate) -> f64 {
    seconds_since_epoch(&date.and_time(NaiveTime::MIN)) / SECONDS_PER_DAY
}

fn wall_clock_seconds(time: &NaiveTime) -> f64 {
    f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1_000_000_000.0
}

/// `HH:MM:SS[.fraction]` as total elapsed seconds; hours may exceed 23.
pub fn parse_clock_text(text: &str) -> Option<f64> {
    let mut parts = text.trim().split(':');
    let (hours, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let hours: i64 = hours.trim().parse().ok()?;
    let minutes: i64 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    Some(hours as f64 * 3_600.0 + minutes as f64 * 60.0 + seconds)
}

fn parse_zoned_text(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

/// Zone-less timestamp text; bare dates resolve to midnight.
pub fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}
