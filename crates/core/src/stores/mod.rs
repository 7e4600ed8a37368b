pub mod local;
pub mod qdrant;

pub use local::LocalIndex;
pub use qdrant::QdrantIndex;

use crate::error::SearchError;
use crate::filter::Filter;
use crate::models::Document;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where the vector indexer keeps its data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexBackend {
    /// JSON snapshot inside the workspace directory.
    #[default]
    Local,
    Qdrant { url: String, collection: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub document: Document,
    pub columns: Map<String, Value>,
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Inserts documents, replacing any stored under the same id.
    async fn upsert(&self, documents: Vec<IndexedDocument>) -> Result<(), SearchError>;

    /// Best `limit` documents by cosine similarity among those passing `filter`.
    async fn search(
        &self,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, SearchError>;

    /// Removes documents whose id or parent id is listed. Returns how many went.
    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError>;

    async fn clear(&self) -> Result<(), SearchError>;

    async fn len(&self) -> Result<usize, SearchError>;
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn backend_config_is_tagged() {
        let backend: IndexBackend = serde_json::from_value(serde_json::json!({
            "kind": "qdrant",
            "url": "http://localhost:6333",
            "collection": "pdf_elements",
        }))
        .expect("backend parses");
        assert!(matches!(backend, IndexBackend::Qdrant { .. }));
    }
}
