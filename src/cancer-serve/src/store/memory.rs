use std::collections::HashMap;

use futures_util::FutureExt;
use log::warn;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{record_from_document, record_to_document, RecordStore, StoreFuture};
use crate::record::{HistoryEntry, PredictionRecord};

/// Process-local record store.
///
/// Documents are kept in their stored JSON shape so reads go through the same
/// normalization as a remote store.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw document, e.g. one carrying a structured `createdAt`.
    pub async fn insert_document(&self, key: &str, document: Map<String, Value>) {
        self.documents
            .write()
            .await
            .insert(key.to_string(), document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn put<'a>(&'a self, record: &'a PredictionRecord) -> StoreFuture<'a, ()> {
        async move {
            self.documents
                .write()
                .await
                .insert(record.id().to_string(), record_to_document(record));
            Ok(())
        }
        .boxed()
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<HistoryEntry>> {
        async move {
            let documents = self.documents.read().await;
            let entries = documents
                .iter()
                .filter_map(|(key, doc)| match record_from_document(key, doc) {
                    Ok(entry) => Some(entry),
                    Err(reason) => {
                        warn!("Skipping document {}: {}", key, reason);
                        None
                    }
                })
                .collect();
            Ok(entries)
        }
        .boxed()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
