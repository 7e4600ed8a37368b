use super::{IndexedDocument, ScoredDocument, VectorIndex};
use crate::error::SearchError;
use crate::filter::Filter;
use crate::models::Document;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

const DOCUMENT_FIELD: &str = "document";
const DOCUMENT_ID_FIELD: &str = "document_id";
const PARENT_ID_FIELD: &str = "parent_id";

pub struct QdrantIndex {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    collection_ready: AtomicBool,
}

impl QdrantIndex {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            collection_ready: AtomicBool::new(false),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let existing = self.client.get(self.collection_url()).send().await?;
        if existing.status() == StatusCode::NOT_FOUND {
            let response = self
                .client
                .put(self.collection_url())
                .json(&json!({
                    "vectors": { "size": self.vector_size, "distance": "Cosine" }
                }))
                .send()
                .await?;
            check_status(response.status())?;
            info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        } else {
            check_status(existing.status())?;
        }

        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }
}

fn check_status(status: StatusCode) -> Result<(), SearchError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        })
    }
}

/// Qdrant point ids must be integers or UUIDs, so document ids are hashed.
pub fn point_id(document_id: &str) -> String {
    let digest = Sha256::digest(document_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn point_payload(entry: &IndexedDocument) -> Result<Value, SearchError> {
    let mut payload = entry.columns.clone();
    payload.insert(
        DOCUMENT_ID_FIELD.to_string(),
        Value::String(entry.document.id.clone()),
    );
    payload.insert(
        PARENT_ID_FIELD.to_string(),
        entry
            .document
            .parent_id
            .clone()
            .map_or(Value::Null, Value::String),
    );
    payload.insert(
        "indexed_at".to_string(),
        Value::String(entry.indexed_at.to_rfc3339()),
    );
    payload.insert(
        DOCUMENT_FIELD.to_string(),
        serde_json::to_value(&entry.document)?,
    );
    Ok(Value::Object(payload))
}

fn parse_hits(parsed: &Value) -> Result<Vec<ScoredDocument>, SearchError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(stored) = hit.pointer("/payload/document") else {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "hit payload has no stored document".to_string(),
            });
        };
        let document: Document = serde_json::from_value(stored.clone())?;
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        result.push(ScoredDocument { document, score });
    }
    Ok(result)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn upsert(&self, documents: Vec<IndexedDocument>) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.ensure_collection().await?;

        let points = documents
            .iter()
            .map(|entry| {
                if entry.embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        entry.embedding.len(),
                        self.vector_size
                    )));
                }
                Ok(json!({
                    "id": point_id(&entry.document.id),
                    "vector": entry.embedding,
                    "payload": point_payload(entry)?,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check_status(response.status())?;
        debug!(points = points.len(), "upserted qdrant points");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, SearchError> {
        if query.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query.len(),
                self.vector_size
            )));
        }
        self.ensure_collection().await?;

        let mut body = json!({
            "vector": query,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.to_qdrant();
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        check_status(response.status())?;

        let parsed: Value = response.json().await?;
        parse_hits(&parsed)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let before = self.len().await?;

        let points = ids.iter().map(|id| point_id(id)).collect::<Vec<_>>();
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "should": [
                        { "has_id": points },
                        { "key": PARENT_ID_FIELD, "match": { "any": ids } },
                    ]
                }
            }))
            .send()
            .await?;
        check_status(response.status())?;

        let after = self.len().await?;
        Ok(before.saturating_sub(after))
    }

    async fn clear(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response.status())?;
        }
        self.collection_ready.store(false, Ordering::Release);
        info!(collection = %self.collection, "dropped qdrant collection");
        Ok(())
    }

    async fn len(&self) -> Result<usize, SearchError> {
        self.ensure_collection().await?;
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        check_status(response.status())?;

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("3f2c9a");
        assert_eq!(first, point_id("3f2c9a"));
        assert_ne!(first, point_id("3f2c9b"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn payload_carries_columns_and_document() -> Result<(), SearchError> {
        let mut document = Document::from_text("Redlichiida");
        document.parent_id = Some("pdf".to_string());
        let mut columns = Map::new();
        columns.insert("element_type".to_string(), json!("text"));
        let entry = IndexedDocument {
            document,
            columns,
            embedding: vec![0.0; 4],
            indexed_at: chrono::Utc::now(),
        };

        let payload = point_payload(&entry)?;
        assert_eq!(payload["element_type"], json!("text"));
        assert_eq!(payload["parent_id"], json!("pdf"));
        assert_eq!(payload["document"]["text"], json!("Redlichiida"));
        Ok(())
    }

    #[test]
    fn hits_are_parsed_back_into_documents() -> Result<(), SearchError> {
        let document = Document::from_text("Asaphida");
        let response = json!({
            "result": [
                { "id": point_id(&document.id), "score": 0.75, "payload": { "document": document } }
            ]
        });

        let hits = parse_hits(&response)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.text.as_deref(), Some("Asaphida"));
        assert!((hits[0].score - 0.75).abs() < 1e-6);
        Ok(())
    }
}
