use super::Executor;
use crate::error::{FlowError, IngestError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{Document, DocumentArray, Endpoint, Parameters, PAGE_TAG};
use async_trait::async_trait;
use tracing::debug;

pub const USES: &str = "pdf-segmenter";

/// Splits root PDF documents into one text chunk per page and one image chunk
/// per embedded picture.
#[derive(Default)]
pub struct PdfSegmenter {
    extractor: LopdfExtractor,
}

impl PdfSegmenter {
    fn segment(&self, doc: &Document) -> Result<Vec<Document>, IngestError> {
        let Some(blob) = doc.blob.as_deref() else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::new();
        for page in self.extractor.extract_pages(blob)? {
            let text = page.text.trim();
            if text.is_empty() {
                continue;
            }
            let mut chunk = Document::from_text(text);
            chunk.parent_id = Some(doc.id.clone());
            chunk.tags.insert(PAGE_TAG.to_string(), page.number.into());
            chunks.push(chunk);
        }

        for image in self.extractor.extract_images(blob)? {
            let mut chunk = Document::from_blob(image.bytes, image.mime_type);
            chunk.parent_id = Some(doc.id.clone());
            chunk.tags.insert(PAGE_TAG.to_string(), image.page.into());
            chunk.tags.insert("width".to_string(), image.width.into());
            chunk.tags.insert("height".to_string(), image.height.into());
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

/// Names the offending input in parse errors.
pub(crate) fn unreadable(doc: &Document, error: IngestError) -> IngestError {
    match error {
        IngestError::PdfParse(details) => IngestError::PdfParse(format!(
            "{}: {details}",
            doc.uri.as_deref().unwrap_or(doc.id.as_str())
        )),
        other => other,
    }
}

#[async_trait]
impl Executor for PdfSegmenter {
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

            let chunks = self.segment(doc).map_err(|error| unreadable(doc, error))?;
            debug!(doc = %doc.id, chunks = chunks.len(), "segmented pdf");
            doc.chunks.extend(chunks);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::fixtures::pdf_with;

    #[tokio::test]
    async fn pages_and_images_become_chunks() -> Result<(), FlowError> {
        let pdf = pdf_with(&["Trilobites had compound eyes."], true);
        let mut docs = DocumentArray::from(vec![Document::from_blob(pdf, "application/pdf")]);

        PdfSegmenter::default()
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await?;

        let chunks = &docs[0].chunks;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0]
            .text
            .as_deref()
            .is_some_and(|text| text.contains("compound eyes")));
        assert_eq!(chunks[1].mime_type.as_deref(), Some("image/png"));
        assert!(chunks[1].is_image());
        assert_eq!(chunks[1].tags.get(PAGE_TAG), Some(&1.into()));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_pdf_fails_the_request() {
        let broken = Document::from_blob(b"%PDF-1.4\n%broken".to_vec(), "application/pdf");
        let id = broken.id.clone();
        let mut docs = DocumentArray::from(vec![broken]);

        let result = PdfSegmenter::default()
            .handle(Endpoint::Index, &mut docs, &Parameters::default())
            .await;

        match result {
            Err(FlowError::Ingest(IngestError::PdfParse(details))) => {
                assert!(details.starts_with(&id));
            }
            other => panic!("expected a pdf parse error, got {other:?}"),
        }
        assert!(docs[0].chunks.is_empty());
    }
}
