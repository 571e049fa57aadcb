use futures_util::FutureExt;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};

use super::{record_from_document, record_to_document, RecordStore, StoreError, StoreFuture, COLLECTION};
use crate::credentials::{AccessTokens, TokenProvider};
use crate::record::{HistoryEntry, PredictionRecord};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

/// Cloud Firestore over its REST API.
pub struct FirestoreStore {
    http: reqwest::Client,
    collection_url: String,
    tokens: AccessTokens,
}

impl FirestoreStore {
    /// Store backed by the production Firestore endpoint.
    pub fn new(http: reqwest::Client, project_id: &str, tokens: AccessTokens) -> Self {
        Self::with_endpoint(http, FIRESTORE_URL, project_id, tokens)
    }

    /// Store backed by a local Firestore emulator (`host:port`); no auth.
    pub fn emulator(http: reqwest::Client, host: &str, project_id: &str) -> Self {
        let tokens = AccessTokens::new(TokenProvider::Anonymous, http.clone());
        Self::with_endpoint(http, &format!("http://{}/v1", host), project_id, tokens)
    }

    pub fn with_endpoint(
        http: reqwest::Client,
        base_url: &str,
        project_id: &str,
        tokens: AccessTokens,
    ) -> Self {
        FirestoreStore {
            http,
            collection_url: collection_url(base_url, project_id),
            tokens,
        }
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, StoreError> {
        Ok(match self.tokens.bearer().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = self.authorized(request).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn put_document(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.collection_url, record.id());
        let body = json!({ "fields": encode_fields(&record_to_document(record)) });

        // PATCH without an update mask replaces the whole document or creates it.
        self.send(self.http.patch(&url).json(&body)).await?;
        debug!("Stored prediction {}", record.id());
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&self.collection_url)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ListDocumentsResponse = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(|e| StoreError::Malformed(e.to_string()))?;

            for document in page.documents {
                let key = document_key(&document.name);
                match record_from_document(key, &decode_fields(&document.fields)) {
                    Ok(entry) => entries.push(entry),
                    Err(reason) => warn!("Skipping document {}: {}", document.name, reason),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(entries)
    }
}

impl RecordStore for FirestoreStore {
    fn put<'a>(&'a self, record: &'a PredictionRecord) -> StoreFuture<'a, ()> {
        self.put_document(record).boxed()
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<HistoryEntry>> {
        self.list_documents().boxed()
    }

    fn backend(&self) -> &'static str {
        "firestore"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

fn collection_url(base_url: &str, project_id: &str) -> String {
    format!(
        "{}/projects/{}/databases/(default)/documents/{}",
        base_url.trim_end_matches('/'),
        project_id,
        COLLECTION
    )
}

/// Last path segment of a full document resource name.
fn document_key(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn encode_fields(doc: &Map<String, Value>) -> Map<String, Value> {
    doc.iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

/// Plain JSON to a Firestore typed value.
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

/// Firestore typed value to plain JSON. Timestamps become RFC 3339 strings.
fn decode_value(value: &Value) -> Value {
    let (kind, inner) = match value.as_object().and_then(|m| m.iter().next()) {
        Some(entry) => entry,
        None => return Value::Null,
    };

    match (kind.as_str(), inner) {
        ("stringValue", v) | ("timestampValue", v) | ("referenceValue", v) => v.clone(),
        ("booleanValue", v) | ("doubleValue", v) => v.clone(),
        ("integerValue", Value::String(s)) => s
            .parse::<i64>()
            .map(|i| Value::Number(Number::from(i)))
            .unwrap_or_else(|_| Value::String(s.clone())),
        ("integerValue", v) => v.clone(),
        ("mapValue", v) => Value::Object(
            v.get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        ("arrayValue", v) => Value::Array(
            v.get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}
