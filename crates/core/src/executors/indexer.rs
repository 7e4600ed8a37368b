use super::{Executor, ExecutorContext};
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::{FlowError, SearchError};
use crate::filter::Filter;
use crate::models::{Document, DocumentArray, Endpoint, Parameters, COSINE_SCORE, ELEMENT_TYPE_TAG};
use crate::stores::{IndexBackend, IndexedDocument, LocalIndex, QdrantIndex, VectorIndex};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const USES: &str = "vector-indexer";

pub const INDEX_SIZE_TAG: &str = "index_size";
pub const SNAPSHOT_FILE: &str = "vector-index.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    #[serde(default = "TraversalPaths::chunks")]
    pub index_traversal_paths: TraversalPaths,
    #[serde(default = "default_search_traversal_paths")]
    pub search_traversal_paths: TraversalPaths,
    /// Filterable columns as `(name, type)`; types are `str`, `int`, `float`, `bool`.
    #[serde(default = "default_columns")]
    pub columns: Vec<(String, String)>,
    #[serde(default = "default_n_dim")]
    pub n_dim: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_search_traversal_paths() -> TraversalPaths {
    TraversalPaths::root_and_chunks()
}

fn default_columns() -> Vec<(String, String)> {
    vec![(ELEMENT_TYPE_TAG.to_string(), "str".to_string())]
}

fn default_n_dim() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

fn default_limit() -> usize {
    10
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_traversal_paths: TraversalPaths::chunks(),
            search_traversal_paths: default_search_traversal_paths(),
            columns: default_columns(),
            n_dim: default_n_dim(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Str,
    Int,
    Float,
    Bool,
}

impl ColumnType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "str" => Some(ColumnType::Str),
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "bool" => Some(ColumnType::Bool),
            _ => None,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnType::Str => value.is_string(),
            ColumnType::Int => value.is_i64() || value.is_u64(),
            ColumnType::Float => value.is_number(),
            ColumnType::Bool => value.is_boolean(),
        }
    }
}

/// Stores embedded documents on `index` and answers `search` with ranked
/// matches; also serves `delete`, `clear` and `status`.
pub struct VectorIndexer {
    index_traversal_paths: TraversalPaths,
    search_traversal_paths: TraversalPaths,
    columns: Vec<(String, ColumnType)>,
    n_dim: usize,
    limit: usize,
    store: Arc<dyn VectorIndex>,
}

impl VectorIndexer {
    pub fn open(config: IndexerConfig, context: &ExecutorContext) -> Result<Self, FlowError> {
        let store: Arc<dyn VectorIndex> = match &context.index_backend {
            IndexBackend::Local => Arc::new(LocalIndex::open(context.workspace.join(SNAPSHOT_FILE))?),
            IndexBackend::Qdrant { url, collection } => {
                Arc::new(QdrantIndex::new(url, collection, config.n_dim))
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(
        config: IndexerConfig,
        store: Arc<dyn VectorIndex>,
    ) -> Result<Self, FlowError> {
        let columns = config
            .columns
            .into_iter()
            .map(|(name, kind)| match ColumnType::parse(&kind) {
                Some(column_type) => Ok((name, column_type)),
                None => Err(FlowError::InvalidConfig {
                    uses: USES.to_string(),
                    details: format!("column {name:?} has unsupported type {kind:?}"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if config.n_dim == 0 {
            return Err(FlowError::InvalidConfig {
                uses: USES.to_string(),
                details: "n_dim must be positive".to_string(),
            });
        }

        Ok(Self {
            index_traversal_paths: config.index_traversal_paths,
            search_traversal_paths: config.search_traversal_paths,
            columns,
            n_dim: config.n_dim,
            limit: config.limit,
            store,
        })
    }

    fn column_values(&self, doc: &Document) -> Result<Map<String, Value>, SearchError> {
        let mut values = Map::new();
        for (name, column_type) in &self.columns {
            let value = doc.tags.get(name).cloned().unwrap_or(Value::Null);
            if !value.is_null() && !column_type.accepts(&value) {
                return Err(SearchError::Request(format!(
                    "document {} has {name}={value}, which is not a {column_type:?} column",
                    doc.id
                )));
            }
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    fn check_filter(&self, filter: &Filter) -> Result<(), SearchError> {
        for column in filter.columns() {
            if !self.columns.iter().any(|(name, _)| name == column) {
                return Err(SearchError::InvalidFilter(format!(
                    "column {column:?} is not indexed"
                )));
            }
        }
        Ok(())
    }

    async fn index(&self, docs: &DocumentArray) -> Result<(), FlowError> {
        let indexed_at = Utc::now();
        let mut entries = Vec::new();
        for doc in self.index_traversal_paths.select(docs) {
            let Some(embedding) = &doc.embedding else {
                continue;
            };
            if embedding.len() != self.n_dim {
                warn!(
                    doc = %doc.id,
                    dimensions = embedding.len(),
                    expected = self.n_dim,
                    "not indexing document with mismatched embedding"
                );
                continue;
            }
            entries.push(IndexedDocument {
                document: doc.stripped_for_storage(),
                columns: self.column_values(doc)?,
                embedding: embedding.clone(),
                indexed_at,
            });
        }

        let indexed = entries.len();
        self.store.upsert(entries).await?;
        info!(indexed, backend = self.store.backend(), "indexed documents");
        Ok(())
    }

    async fn search(
        &self,
        docs: &mut DocumentArray,
        parameters: &Parameters,
    ) -> Result<(), FlowError> {
        if let Some(filter) = &parameters.filter {
            self.check_filter(filter)?;
        }
        let limit = parameters.limit.unwrap_or(self.limit);

        let queries = self
            .search_traversal_paths
            .select(docs)
            .into_iter()
            .map(|doc| doc.embedding.clone())
            .collect::<Vec<_>>();

        let mut results = Vec::with_capacity(queries.len());
        for query in &queries {
            let matches = match query {
                Some(embedding) => Some(
                    self.store
                        .search(embedding, parameters.filter.as_ref(), limit)
                        .await?,
                ),
                None => None,
            };
            results.push(matches);
        }

        let mut results = results.into_iter();
        self.search_traversal_paths.apply_mut(docs, |doc| {
            let Some(Some(hits)) = results.next() else {
                return;
            };
            doc.matches = hits
                .into_iter()
                .map(|hit| {
                    let mut matched = hit.document;
                    matched.scores.insert(COSINE_SCORE.to_string(), hit.score);
                    matched
                })
                .collect();
            debug!(doc = %doc.id, matches = doc.matches.len(), "ranked matches");
        });
        Ok(())
    }

    async fn delete(&self, docs: &DocumentArray) -> Result<(), FlowError> {
        let mut ids = docs.iter().map(|doc| doc.id.clone()).collect::<Vec<_>>();
        ids.extend(
            self.index_traversal_paths
                .select(docs)
                .into_iter()
                .map(|doc| doc.id.clone()),
        );
        let removed = self.store.delete(&ids).await?;
        info!(removed, "deleted documents from index");
        Ok(())
    }
}

#[async_trait]
impl Executor for VectorIndexer {
    fn uses(&self) -> &'static str {
        USES
    }

    fn handles(&self, _endpoint: Endpoint) -> bool {
        true
    }

    async fn handle(
        &self,
        endpoint: Endpoint,
        docs: &mut DocumentArray,
        parameters: &Parameters,
    ) -> Result<(), FlowError> {
        match endpoint {
            Endpoint::Index => self.index(docs).await,
            Endpoint::Search => self.search(docs, parameters).await,
            Endpoint::Delete => self.delete(docs).await,
            Endpoint::Clear => {
                self.store.clear().await?;
                info!("cleared index");
                Ok(())
            }
            Endpoint::Status => {
                let size = self.store.len().await?;
                docs.push(
                    Document::new()
                        .with_tag(INDEX_SIZE_TAG, size)
                        .with_tag("backend", self.store.backend())
                        .with_tag("n_dim", self.n_dim),
                );
                Ok(())
            }
        }
    }
}
