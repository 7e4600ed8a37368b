use super::Executor;
use crate::error::FlowError;
use crate::models::{Document, DocumentArray, ElementType, Endpoint, Parameters};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use tracing::debug;

pub const USES: &str = "element-type-tagger";

/// Tags documents with their `element_type` unless an earlier stage already did.
pub struct ElementTypeTagger {
    traversal_paths: TraversalPaths,
}

impl ElementTypeTagger {
    pub fn new(traversal_paths: TraversalPaths) -> Self {
        Self { traversal_paths }
    }
}

pub(crate) fn infer_element_type(doc: &Document) -> Option<ElementType> {
    if doc.is_image() {
        Some(ElementType::Image)
    } else if doc.has_text() {
        Some(ElementType::Text)
    } else {
        None
    }
}

#[async_trait]
impl Executor for ElementTypeTagger {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        let mut tagged = 0usize;
        self.traversal_paths.apply_mut(docs, |doc| {
            if doc.element_type().is_some() {
                return;
            }
            if let Some(element_type) = infer_element_type(doc) {
                doc.set_element_type(element_type);
                tagged += 1;
            }
        });
        debug!(tagged, "tagged element types");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tags_text_and_images_but_keeps_tables() -> Result<(), FlowError> {
        let mut root = Document::new();
        root.chunks.push(Document::from_text("Cambrian explosion"));
        root.chunks.push(Document::from_blob(vec![0, 1], "image/png"));
        let mut table = Document::from_text("a | b");
        table.set_element_type(ElementType::Table);
        root.chunks.push(table);
        root.chunks.push(Document::new());
        let mut docs = DocumentArray::from(vec![root]);

        ElementTypeTagger::new(TraversalPaths::chunks())
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let types = docs[0]
            .chunks
            .iter()
            .map(Document::element_type)
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                Some(ElementType::Text),
                Some(ElementType::Image),
                Some(ElementType::Table),
                None
            ]
        );
        assert_eq!(docs[0].element_type(), None);
        Ok(())
    }
}
