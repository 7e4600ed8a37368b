use super::Executor;
use crate::error::FlowError;
use crate::models::{Document, DocumentArray, Endpoint, Parameters};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use tracing::debug;

pub const USES: &str = "chunk-flattener";

/// Replaces a document's chunk tree by its leaves, depth first.
pub struct ChunkFlattener {
    traversal_paths: TraversalPaths,
}

impl ChunkFlattener {
    pub fn new(traversal_paths: TraversalPaths) -> Self {
        Self { traversal_paths }
    }
}

fn collect_leaves(chunks: Vec<Document>, root_id: &str, leaves: &mut Vec<Document>) {
    for mut chunk in chunks {
        if chunk.chunks.is_empty() {
            chunk.parent_id = Some(root_id.to_string());
            leaves.push(chunk);
        } else {
            let nested = std::mem::take(&mut chunk.chunks);
            collect_leaves(nested, root_id, leaves);
        }
    }
}

#[async_trait]
impl Executor for ChunkFlattener {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        self.traversal_paths.apply_mut(docs, |doc| {
            let chunks = std::mem::take(&mut doc.chunks);
            let mut leaves = Vec::with_capacity(chunks.len());
            collect_leaves(chunks, &doc.id, &mut leaves);
            debug!(doc = %doc.id, leaves = leaves.len(), "flattened chunks");
            doc.chunks = leaves;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sentences_replace_their_pages() -> Result<(), FlowError> {
        let mut page = Document::from_text("One. Two.");
        page.chunks.push(Document::from_text("One."));
        page.chunks.push(Document::from_text("Two."));
        let mut root = Document::new();
        root.chunks.push(Document::from_text("table text"));
        root.chunks.push(page);
        root.chunks.push(Document::from_blob(vec![1], "image/png"));
        let root_id = root.id.clone();
        let mut docs = DocumentArray::from(vec![root]);

        ChunkFlattener::new(TraversalPaths::root())
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let chunks = &docs[0].chunks;
        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![Some("table text"), Some("One."), Some("Two."), None]
        );
        assert!(chunks
            .iter()
            .all(|chunk| chunk.parent_id.as_deref() == Some(root_id.as_str())));
        Ok(())
    }
}
