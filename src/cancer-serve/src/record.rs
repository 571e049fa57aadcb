use std::fmt;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Outcome of one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Cancer")]
    Cancer,
    #[serde(rename = "Non-cancer")]
    NonCancer,
    /// Sentinel written only when inference failures are recorded instead of
    /// rejected.
    #[serde(rename = "Error during prediction")]
    PredictionError,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Cancer => "Cancer",
            Label::NonCancer => "Non-cancer",
            Label::PredictionError => "Error during prediction",
        }
    }

    /// Advisory text shown next to the label.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Label::Cancer => "Segera periksa ke dokter!",
            Label::NonCancer => "Penyakit kanker tidak terdeteksi.",
            Label::PredictionError => "Prediksi gagal, silakan coba lagi.",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Cancer" => Some(Label::Cancer),
            "Non-cancer" => Some(Label::NonCancer),
            "Error during prediction" => Some(Label::PredictionError),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted prediction.
///
/// The suggestion is always derived from the label, so a record can never
/// carry advice that contradicts its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    id: String,
    result: Label,
    suggestion: &'static str,
    #[serde(serialize_with = "serialize_iso")]
    created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Fresh record with a generated id, stamped with the current time.
    pub fn new(result: Label) -> Self {
        Self::from_parts(Uuid::new_v4().to_string(), result, now_millis())
    }

    /// Rebuild a record read back from storage.
    pub fn from_parts(id: String, result: Label, created_at: DateTime<Utc>) -> Self {
        PredictionRecord {
            id,
            result,
            suggestion: result.suggestion(),
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn result(&self) -> Label {
        self.result
    }

    pub fn suggestion(&self) -> &'static str {
        self.suggestion
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// One row of the history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub history: PredictionRecord,
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_iso<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&iso_timestamp(*at))
}

// Stored timestamps carry milliseconds, so a record reads back equal to itself.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(now)
}
