use super::Executor;
use crate::error::FlowError;
use crate::models::{Document, DocumentArray, Endpoint, Parameters};
use crate::traversal::TraversalPaths;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub const USES: &str = "tags-copier";

/// Pushes each selected document's tags down into all of its descendants.
pub struct TagsCopier {
    traversal_paths: TraversalPaths,
}

impl TagsCopier {
    pub fn new(traversal_paths: TraversalPaths) -> Self {
        Self { traversal_paths }
    }
}

fn copy_down(tags: &Map<String, Value>, chunks: &mut [Document]) {
    for chunk in chunks {
        for (key, value) in tags {
            if !chunk.tags.contains_key(key) {
                chunk.tags.insert(key.clone(), value.clone());
            }
        }
        let merged = chunk.tags.clone();
        copy_down(&merged, &mut chunk.chunks);
    }
}

#[async_trait]
impl Executor for TagsCopier {
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
            if doc.tags.is_empty() || doc.chunks.is_empty() {
                return;
            }
            copy_down(&doc.tags, &mut doc.chunks);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementType, ELEMENT_TYPE_TAG};

    #[tokio::test]
    async fn tags_reach_every_descendant_without_overwriting() -> Result<(), FlowError> {
        let mut grandchild = Document::from_text("deep");
        grandchild.tags.insert("page".to_string(), 9.into());
        let mut sentence = Document::from_text("sentence");
        sentence.chunks.push(grandchild);

        let mut page = Document::from_text("page text").with_tag("page", 3);
        page.set_element_type(ElementType::Text);
        page.chunks.push(sentence);

        let mut root = Document::new();
        root.chunks.push(page);
        let mut docs = DocumentArray::from(vec![root]);

        TagsCopier::new(TraversalPaths::chunks())
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let sentence = &docs[0].chunks[0].chunks[0];
        assert_eq!(sentence.element_type(), Some(ElementType::Text));
        assert_eq!(sentence.tags.get("page"), Some(&3.into()));

        let deep = &sentence.chunks[0];
        assert_eq!(deep.tags.get(ELEMENT_TYPE_TAG), Some(&"text".into()));
        assert_eq!(deep.tags.get("page"), Some(&9.into()));
        Ok(())
    }
}
