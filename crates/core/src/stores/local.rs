use super::{cosine_similarity, IndexedDocument, ScoredDocument, VectorIndex};
use crate::error::SearchError;
use crate::filter::Filter;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// In-memory vector index persisted as a JSON snapshot after every change.
pub struct LocalIndex {
    path: PathBuf,
    entries: RwLock<Vec<IndexedDocument>>,
    /// Held for the whole snapshot, write and rename.
    writer: Mutex<()>,
}

impl LocalIndex {
    /// Opens the snapshot at `path`, starting empty when there is none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SearchError> {
        let path = path.into();
        let entries = if path.is_file() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice::<Vec<IndexedDocument>>(&bytes)?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), documents = entries.len(), "opened local index");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), SearchError> {
        let _writer = self.writer.lock().await;
        let bytes = serde_json::to_vec(&*self.entries.read())?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "persisted local index");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn upsert(&self, documents: Vec<IndexedDocument>) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        {
            let mut entries = self.entries.write();
            for document in documents {
                match entries
                    .iter_mut()
                    .find(|entry| entry.document.id == document.document.id)
                {
                    Some(existing) => *existing = document,
                    None => entries.push(document),
                }
            }
        }
        self.persist().await
    }

    async fn search(
        &self,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, SearchError> {
        let entries = self.entries.read();
        let mut scored = entries
            .iter()
            .filter(|entry| filter.map_or(true, |filter| filter.matches(&entry.columns)))
            .map(|entry| ScoredDocument {
                score: cosine_similarity(query, &entry.embedding),
                document: entry.document.clone(),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, SearchError> {
        let ids = ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|entry| {
                let document = &entry.document;
                !ids.contains(document.id.as_str())
                    && !document
                        .parent_id
                        .as_deref()
                        .is_some_and(|parent| ids.contains(parent))
            });
            before - entries.len()
        };
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), SearchError> {
        self.entries.write().clear();
        self.persist().await
    }

    async fn len(&self) -> Result<usize, SearchError> {
        Ok(self.entries.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, ElementType, ELEMENT_TYPE_TAG};
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn entry(text: &str, element_type: ElementType, embedding: Vec<f32>) -> IndexedDocument {
        let mut columns = Map::new();
        columns.insert(
            ELEMENT_TYPE_TAG.to_string(),
            Value::String(element_type.as_str().to_string()),
        );
        IndexedDocument {
            document: Document::from_text(text),
            columns,
            embedding,
            indexed_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");

        let index = LocalIndex::open(&path)?;
        index
            .upsert(vec![entry("eyes", ElementType::Text, vec![1.0, 0.0])])
            .await?;
        drop(index);

        let reopened = LocalIndex::open(&path)?;
        assert_eq!(reopened.len().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_within_filter() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path().join("index.json"))?;
        index
            .upsert(vec![
                entry("close text", ElementType::Text, vec![1.0, 0.1]),
                entry("far text", ElementType::Text, vec![0.0, 1.0]),
                entry("closest table", ElementType::Table, vec![1.0, 0.0]),
            ])
            .await?;

        let filter = Filter::element_types(&[ElementType::Text]);
        let hits = index.search(&[1.0, 0.0], Some(&filter), 5).await?;
        let texts = hits
            .iter()
            .filter_map(|hit| hit.document.text.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["close text", "far text"]);
        assert!(hits[0].score > hits[1].score);

        let top = index.search(&[1.0, 0.0], None, 1).await?;
        assert_eq!(top[0].document.text.as_deref(), Some("closest table"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_all_persist() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");
        let index = Arc::new(LocalIndex::open(&path)?);

        let writers = (0..32)
            .map(|n| {
                let index = Arc::clone(&index);
                tokio::spawn(async move {
                    index
                        .upsert(vec![entry(&format!("page {n}"), ElementType::Text, vec![1.0])])
                        .await
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.await??;
        }

        assert_eq!(index.len().await?, 32);
        assert_eq!(LocalIndex::open(&path)?.len().await?, 32);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_children_of_listed_parents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path().join("index.json"))?;
        let mut child = entry("page", ElementType::Text, vec![1.0]);
        child.document.parent_id = Some("pdf-1".to_string());
        let other = entry("other", ElementType::Text, vec![1.0]);
        let other_id = other.document.id.clone();
        index.upsert(vec![child, other]).await?;

        assert_eq!(index.delete(&["pdf-1".to_string()]).await?, 1);
        assert_eq!(index.delete(&[other_id]).await?, 1);
        assert_eq!(index.len().await?, 0);

        index.clear().await?;
        assert_eq!(index.len().await?, 0);
        Ok(())
    }
}
