use super::segmenter::unreadable;
use super::Executor;
use crate::error::{FlowError, IngestError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{
    Document, DocumentArray, ElementType, Endpoint, Parameters, PAGE_TAG, TABLE_CONTENT_TAG,
};
use crate::tables::{TableDetector, DEFAULT_MIN_TABLE_ROWS};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const USES: &str = "pdf-table-extractor";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableExtractorConfig {
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
}

fn default_min_rows() -> usize {
    DEFAULT_MIN_TABLE_ROWS
}

impl Default for TableExtractorConfig {
    fn default() -> Self {
        Self {
            min_rows: DEFAULT_MIN_TABLE_ROWS,
        }
    }
}

/// Appends one `table` chunk per detected table to every root PDF document.
pub struct TableExtractor {
    detector: TableDetector,
    extractor: LopdfExtractor,
}

impl TableExtractor {
    pub fn new(config: TableExtractorConfig) -> Result<Self, IngestError> {
        Ok(Self {
            detector: TableDetector::new(config.min_rows)?,
            extractor: LopdfExtractor,
        })
    }

    fn extract(&self, doc: &Document) -> Result<Vec<Document>, IngestError> {
        let Some(blob) = doc.blob.as_deref() else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::new();
        for page in self.extractor.extract_pages(blob)? {
            for table in self.detector.detect(&page.text) {
                let mut chunk = Document::from_text(table.to_text());
                chunk.parent_id = Some(doc.id.clone());
                chunk.mime_type = Some("text/csv".to_string());
                chunk.set_element_type(ElementType::Table);
                chunk
                    .tags
                    .insert(TABLE_CONTENT_TAG.to_string(), Value::String(table.to_csv()?));
                chunk.tags.insert(PAGE_TAG.to_string(), page.number.into());
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}

#[async_trait]
impl Executor for TableExtractor {
    fn uses(&self) -> &'static str {
        USES
    }

    async fn handle(
        &self,
        _endpoint: Endpoint,
        docs: &mut DocumentArray,
        _parameters: &Parameters,
    ) -> Result<(), FlowError> {
        for doc in docs.iter_mut() {
            if !doc.is_pdf() {
                continue;
            }
            if doc.blob.is_none() && doc.uri.is_some() {
                doc.load_uri_to_blob()?;
            }

            let tables = self.extract(doc).map_err(|error| unreadable(doc, error))?;
            debug!(doc = %doc.id, tables = tables.len(), "extracted tables");
            doc.chunks.extend(tables);
        }
        Ok(())
    }
}
