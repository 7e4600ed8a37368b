use super::Executor;
use crate::embeddings::{ClipInput, ClipModel};
use crate::error::FlowError;
use crate::models::{Document, DocumentArray, Endpoint, Parameters};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const USES: &str = "clip-encoder";

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    #[serde(default = "TraversalPaths::chunks")]
    pub traversal_paths: TraversalPaths,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            traversal_paths: TraversalPaths::chunks(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Writes a CLIP embedding onto every traversed text or image document.
pub struct ClipEncoder {
    config: EncoderConfig,
    model: Arc<dyn ClipModel>,
}

impl ClipEncoder {
    pub fn new(config: EncoderConfig, model: Arc<dyn ClipModel>) -> Self {
        Self { config, model }
    }

    /// Images the preprocessor could not decode are left without an embedding.
    fn input_for<'a>(&self, doc: &'a Document) -> Option<ClipInput<'a>> {
        let input = clip_input(doc)?;
        if self.model.accepts(&input) {
            Some(input)
        } else {
            warn!(doc = %doc.id, "not encoding image the model cannot read");
            None
        }
    }
}

fn clip_input(doc: &Document) -> Option<ClipInput<'_>> {
    if doc.tensor.is_some() || doc.is_image() {
        return Some(ClipInput::Image {
            tensor: doc.tensor.as_ref(),
            blob: doc.blob.as_deref(),
        });
    }
    doc.text
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .map(ClipInput::Text)
}

#[async_trait]
impl Executor for ClipEncoder {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        let batch_size = self.config.batch_size.max(1);

        let mut embeddings = Vec::new();
        {
            let inputs = self
                .config
                .traversal_paths
                .select(docs)
                .into_iter()
                .filter_map(|doc| self.input_for(doc))
                .collect::<Vec<_>>();

            for batch in inputs.chunks(batch_size) {
                let encoded = self.model.encode(batch).await?;
                if encoded.len() != batch.len() {
                    return Err(FlowError::Embedding(format!(
                        "model returned {} embeddings for {} inputs",
                        encoded.len(),
                        batch.len()
                    )));
                }
                embeddings.extend(encoded);
            }
        }

        let encoded = embeddings.len();
        let mut embeddings = embeddings.into_iter();
        self.config.traversal_paths.apply_mut(docs, |doc| {
            if clip_input(doc).is_some_and(|input| self.model.accepts(&input)) {
                doc.embedding = embeddings.next();
            }
        });

        debug!(encoded, dimensions = self.model.dimensions(), "encoded documents");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingClipModel;
    use crate::models::ImageTensor;

    #[tokio::test]
    async fn text_and_tensors_get_embeddings_in_small_batches() -> Result<(), FlowError> {
        let mut root = Document::new();
        root.chunks.push(Document::from_text("Olenellus"));
        root.chunks.push(Document {
            tensor: Some(ImageTensor {
                shape: [3, 2, 2],
                data: vec![0.5; 12],
            }),
            ..Document::new()
        });
        root.chunks.push(Document::new());
        root.chunks.push(Document::from_text("Paradoxides"));
        let mut docs = DocumentArray::from(vec![root]);

        let encoder = ClipEncoder::new(
            EncoderConfig {
                batch_size: 2,
                ..Default::default()
            },
            Arc::new(HashingClipModel::new(16)),
        );
        encoder
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let lengths = docs[0]
            .chunks
            .iter()
            .map(|chunk| chunk.embedding.as_ref().map(Vec::len))
            .collect::<Vec<_>>();
        assert_eq!(lengths, vec![Some(16), Some(16), None, Some(16)]);
        assert!(docs[0].embedding.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_images_are_left_unencoded() -> Result<(), FlowError> {
        let mut root = Document::new();
        root.chunks.push(Document::from_text("Calymene"));
        root.chunks.push(Document::from_blob(b"not a jpeg".to_vec(), "image/jpeg"));
        root.chunks.push(Document::from_text("Trinucleus"));
        let mut docs = DocumentArray::from(vec![root]);

        let encoder = ClipEncoder::new(EncoderConfig::default(), Arc::new(HashingClipModel::new(8)));
        encoder
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let encoded = docs[0]
            .chunks
            .iter()
            .map(|chunk| chunk.embedding.is_some())
            .collect::<Vec<_>>();
        assert_eq!(encoded, vec![true, false, true]);
        Ok(())
    }

    #[tokio::test]
    async fn hollow_tensor_is_an_embedding_error() {
        let encoder = ClipEncoder::new(
            EncoderConfig {
                traversal_paths: TraversalPaths::root(),
                ..Default::default()
            },
            Arc::new(HashingClipModel::default()),
        );
        let mut docs = DocumentArray::from(vec![Document {
            tensor: Some(ImageTensor {
                shape: [3, 224, 224],
                data: Vec::new(),
            }),
            ..Document::new()
        }]);

        let result = encoder
            .handle(Endpoint::Search, &mut docs, &Parameters::default())
            .await;
        assert!(matches!(result, Err(FlowError::Embedding(_))));
    }

    #[tokio::test]
    async fn encoding_is_deterministic() -> Result<(), FlowError> {
        let encoder = ClipEncoder::new(
            EncoderConfig {
                traversal_paths: TraversalPaths::root(),
                ..Default::default()
            },
            Arc::new(HashingClipModel::default()),
        );
        let mut first = DocumentArray::from(vec![Document::from_text("trilobite eyes")]);
        let mut second = first.clone();

        encoder
            .handle(Endpoint::Search, &mut first, &Parameters::default())
            .await?;
        encoder
            .handle(Endpoint::Search, &mut second, &Parameters::default())
            .await?;

        assert_eq!(first[0].embedding, second[0].embedding);
        assert_eq!(first[0].embedding.as_ref().map(Vec::len), Some(512));
        Ok(())
    }
}
