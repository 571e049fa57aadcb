mod firestore;
mod memory;
pub mod timestamp;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use timestamp::StoredTimestamp;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::credentials::CredentialError;
use crate::record::{HistoryEntry, Label, PredictionRecord};

/// Name of the collection holding prediction documents.
pub const COLLECTION: &str = "predictions";

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),
    #[error("document store answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("document store authentication failed: {0}")]
    Auth(#[from] CredentialError),
    #[error("unexpected document store response: {0}")]
    Malformed(String),
}

/// A document collection of [`PredictionRecord`]s keyed by record id.
///
/// Implementations must be safe to share between request tasks.
pub trait RecordStore: Send + Sync {
    /// Upsert `record` under its id.
    fn put<'a>(&'a self, record: &'a PredictionRecord) -> StoreFuture<'a, ()>;

    /// Every stored record, in no particular order.
    fn list_all(&self) -> StoreFuture<'_, Vec<HistoryEntry>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Document body written for `record`.
pub(crate) fn record_to_document(record: &PredictionRecord) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("id".into(), Value::String(record.id().to_string()));
    doc.insert("result".into(), Value::String(record.result().as_str().to_string()));
    doc.insert("suggestion".into(), Value::String(record.suggestion().to_string()));
    doc.insert(
        "createdAt".into(),
        StoredTimestamp::for_write(record.created_at()).to_json(),
    );
    doc
}

/// Rebuild a record from a stored document, normalizing `createdAt`.
///
/// A document whose `createdAt` names no instant is an error, never passed
/// through.
pub(crate) fn record_from_document(
    key: &str,
    doc: &Map<String, Value>,
) -> Result<HistoryEntry, String> {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();

    let result = doc
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing result".to_string())?;
    let result = Label::parse(result).ok_or_else(|| format!("unknown result {:?}", result))?;

    let created_at = doc
        .get("createdAt")
        .and_then(StoredTimestamp::from_json)
        .and_then(|ts| ts.to_datetime())
        .ok_or_else(|| format!("unreadable createdAt {:?}", doc.get("createdAt")))?;

    Ok(HistoryEntry {
        id: key.to_string(),
        history: PredictionRecord::from_parts(id, result, created_at),
    })
}
