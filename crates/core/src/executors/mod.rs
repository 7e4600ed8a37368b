//! Processing stages. Each executor mutates the request's documents in place.

pub mod encoder;
pub mod flattener;
pub mod image_preprocessor;
pub mod indexer;
pub mod segmenter;
pub mod sentencizer;
pub mod table_extractor;
pub mod tagger;
pub mod tags_copier;

pub use encoder::{ClipEncoder, EncoderConfig};
pub use flattener::ChunkFlattener;
pub use image_preprocessor::{ImagePreprocessor, ImagePreprocessorConfig};
pub use indexer::{IndexerConfig, VectorIndexer};
pub use segmenter::PdfSegmenter;
pub use sentencizer::{Sentencizer, SentencizerConfig};
pub use table_extractor::{TableExtractor, TableExtractorConfig};
pub use tagger::ElementTypeTagger;
pub use tags_copier::TagsCopier;

use crate::embeddings::ClipModel;
use crate::error::FlowError;
use crate::models::{DocumentArray, Endpoint, Parameters};
use crate::stores::IndexBackend;
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Registry identifier, e.g. `pdf-segmenter`.
    fn uses(&self) -> &'static str;

    fn handles(&self, endpoint: Endpoint) -> bool {
        endpoint.carries_content()
    }

    async fn handle(
        &self,
        endpoint: Endpoint,
        docs: &mut DocumentArray,
        parameters: &Parameters,
    ) -> Result<(), FlowError>;
}

/// Shared resources executors are built against.
#[derive(Clone)]
pub struct ExecutorContext {
    pub clip: Arc<dyn ClipModel>,
    pub index_backend: IndexBackend,
    pub workspace: PathBuf,
}

/// `uses_with` block for executors that only take a traversal path.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraversalConfig {
    #[serde(default)]
    pub traversal_paths: Option<TraversalPaths>,
}

pub(crate) fn parse_config<T: DeserializeOwned>(
    uses: &str,
    uses_with: &Value,
) -> Result<T, FlowError> {
    let value = if uses_with.is_null() {
        Value::Object(Default::default())
    } else {
        uses_with.clone()
    };
    serde_json::from_value(value).map_err(|error| FlowError::InvalidConfig {
        uses: uses.to_string(),
        details: error.to_string(),
    })
}

pub(crate) fn traversal_or(
    uses: &str,
    uses_with: &Value,
    default: TraversalPaths,
) -> Result<TraversalPaths, FlowError> {
    let config: TraversalConfig = parse_config(uses, uses_with)?;
    Ok(config.traversal_paths.unwrap_or(default))
}

/// Builds the executor registered under `uses`.
pub fn build_executor(
    uses: &str,
    uses_with: &Value,
    context: &ExecutorContext,
) -> Result<Arc<dyn Executor>, FlowError> {
    let executor: Arc<dyn Executor> = match uses {
        table_extractor::USES => Arc::new(TableExtractor::new(parse_config(uses, uses_with)?)?),
        segmenter::USES => {
            parse_config::<serde_json::Map<String, Value>>(uses, uses_with)?;
            Arc::new(PdfSegmenter::default())
        }
        tagger::USES => Arc::new(ElementTypeTagger::new(traversal_or(
            uses,
            uses_with,
            TraversalPaths::chunks(),
        )?)),
        sentencizer::USES => Arc::new(Sentencizer::new(parse_config(uses, uses_with)?)),
        tags_copier::USES => Arc::new(TagsCopier::new(traversal_or(
            uses,
            uses_with,
            TraversalPaths::chunks(),
        )?)),
        flattener::USES => Arc::new(ChunkFlattener::new(traversal_or(
            uses,
            uses_with,
            TraversalPaths::root(),
        )?)),
        image_preprocessor::USES => {
            Arc::new(ImagePreprocessor::new(parse_config(uses, uses_with)?))
        }
        encoder::USES => Arc::new(ClipEncoder::new(
            parse_config(uses, uses_with)?,
            Arc::clone(&context.clip),
        )),
        indexer::USES => Arc::new(VectorIndexer::open(parse_config(uses, uses_with)?, context)?),
        other => return Err(FlowError::UnknownExecutor(other.to_string())),
    };
    Ok(executor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingClipModel;
    use serde_json::json;

    fn context() -> ExecutorContext {
        ExecutorContext {
            clip: Arc::new(HashingClipModel::default()),
            index_backend: IndexBackend::Local,
            workspace: std::env::temp_dir(),
        }
    }

    #[test]
    fn registry_resolves_known_executors() -> Result<(), FlowError> {
        let executor = build_executor(
            "element-type-tagger",
            &json!({"traversal_paths": "@c"}),
            &context(),
        )?;
        assert_eq!(executor.uses(), "element-type-tagger");
        Ok(())
    }

    #[test]
    fn registry_rejects_unknown_executors_and_fields() {
        assert!(matches!(
            build_executor("spacy", &Value::Null, &context()),
            Err(FlowError::UnknownExecutor(_))
        ));
        assert!(matches!(
            build_executor("tags-copier", &json!({"traversal": "@c"}), &context()),
            Err(FlowError::InvalidConfig { .. })
        ));
    }
}
