use super::Executor;
use crate::error::FlowError;
use crate::models::{Document, DocumentArray, ElementType, Endpoint, Parameters, PAGE_TAG};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

pub const USES: &str = "sentencizer";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentencizerConfig {
    #[serde(default = "TraversalPaths::chunks")]
    pub traversal_paths: TraversalPaths,
    /// Sentences shorter than this many characters are dropped.
    #[serde(default = "default_min_sentence_len")]
    pub min_sentence_len: usize,
}

fn default_min_sentence_len() -> usize {
    1
}

impl Default for SentencizerConfig {
    fn default() -> Self {
        Self {
            traversal_paths: TraversalPaths::chunks(),
            min_sentence_len: default_min_sentence_len(),
        }
    }
}

/// Splits text documents into one sub-chunk per sentence.
pub struct Sentencizer {
    config: SentencizerConfig,
}

impl Sentencizer {
    pub fn new(config: SentencizerConfig) -> Self {
        Self { config }
    }
}

/// Unicode sentence boundaries over whitespace-normalized text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized
        .unicode_sentences()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Executor for Sentencizer {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        let min_len = self.config.min_sentence_len;
        let mut sentences = 0usize;

        self.config.traversal_paths.apply_mut(docs, |doc| {
            if doc.element_type() == Some(ElementType::Table) {
                return;
            }
            let Some(text) = doc.text.as_deref() else {
                return;
            };

            for sentence in split_sentences(text) {
                if sentence.chars().count() < min_len {
                    continue;
                }
                let mut chunk = Document::from_text(sentence);
                chunk.parent_id = Some(doc.id.clone());
                if let Some(page) = doc.tags.get(PAGE_TAG) {
                    chunk.tags.insert(PAGE_TAG.to_string(), page.clone());
                }
                doc.chunks.push(chunk);
                sentences += 1;
            }
        });

        debug!(sentences, "split sentences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized_between_sentences() {
        let sentences = split_sentences("Trilobites moulted.\n\nTheir   eyes were calcite.  ");
        assert_eq!(
            sentences,
            vec!["Trilobites moulted.", "Their eyes were calcite."]
        );
        assert!(split_sentences("   \n ").is_empty());
    }

    #[tokio::test]
    async fn splits_text_chunks_and_skips_tables() -> Result<(), FlowError> {
        let mut root = Document::new();
        root.chunks
            .push(Document::from_text("First sentence. Second one!").with_tag(PAGE_TAG, 2));
        let mut table = Document::from_text("Order | Period. Agnostida | Cambrian.");
        table.set_element_type(ElementType::Table);
        root.chunks.push(table);
        let mut docs = DocumentArray::from(vec![root]);

        Sentencizer::new(SentencizerConfig::default())
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let page = &docs[0].chunks[0];
        assert_eq!(page.chunks.len(), 2);
        assert_eq!(page.chunks[0].text.as_deref(), Some("First sentence."));
        assert_eq!(page.chunks[1].parent_id.as_deref(), Some(page.id.as_str()));
        assert_eq!(page.chunks[1].tags.get(PAGE_TAG), Some(&2.into()));
        assert!(docs[0].chunks[1].chunks.is_empty());
        Ok(())
    }
}
