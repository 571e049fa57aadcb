use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::record::iso_timestamp;

/// Zone-less layouts read as UTC when a stored string is not RFC 3339.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A `createdAt` value as found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredTimestamp {
    /// Written as a string, normally already ISO-8601.
    Text(String),
    /// Seconds/nanoseconds since the Unix epoch.
    Structured { seconds: i64, nanos: u32 },
}

impl StoredTimestamp {
    /// Shape used on write. Records are always written as ISO strings.
    pub fn for_write(at: DateTime<Utc>) -> Self {
        StoredTimestamp::Text(iso_timestamp(at))
    }

    pub fn to_json(&self) -> Value {
        match self {
            StoredTimestamp::Text(text) => Value::String(text.clone()),
            StoredTimestamp::Structured { seconds, nanos } => {
                json!({ "seconds": seconds, "nanos": nanos })
            }
        }
    }

    /// Recognizes a plain JSON string, a number of epoch seconds (integer or
    /// fractional), or a `{seconds, nanos}` / `{_seconds, _nanoseconds}` object.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(StoredTimestamp::Text(text.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(seconds) => Some(StoredTimestamp::Structured { seconds, nanos: 0 }),
                None => n.as_f64().and_then(from_fractional_seconds),
            },
            Value::Object(map) => {
                let seconds = map
                    .get("_seconds")
                    .or_else(|| map.get("seconds"))
                    .and_then(as_i64)?;
                let nanos = map
                    .get("_nanoseconds")
                    .or_else(|| map.get("nanos"))
                    .and_then(as_i64)
                    .unwrap_or(0);
                let nanos = u32::try_from(nanos).ok().filter(|n| *n < 1_000_000_000)?;
                Some(StoredTimestamp::Structured { seconds, nanos })
            }
            _ => None,
        }
    }

    /// The instant this value denotes, or `None` if it names no instant.
    ///
    /// Strings are tried as RFC 3339 first, then as zone-less UTC.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            StoredTimestamp::Text(text) => parse_text(text.trim()),
            StoredTimestamp::Structured { seconds, nanos } => {
                Utc.timestamp_opt(*seconds, *nanos).single()
            }
        }
    }
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_fractional_seconds(value: f64) -> Option<StoredTimestamp> {
    if !value.is_finite() || value.abs() >= i64::MAX as f64 {
        return None;
    }
    let seconds = value.floor();
    let nanos = (((value - seconds) * 1e9).round() as u32).min(999_999_999);
    Some(StoredTimestamp::Structured {
        seconds: seconds as i64,
        nanos,
    })
}

// Firestore encodes 64-bit integers as strings.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
