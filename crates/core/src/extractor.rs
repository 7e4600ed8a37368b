use crate::error::IngestError;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::io::Cursor;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PageImage {
    pub page: u32,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub trait PdfExtractor {
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, IngestError>;
    fn extract_images(&self, pdf: &[u8]) -> Result<Vec<PageImage>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document = load(pdf)?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }

    fn extract_images(&self, pdf: &[u8]) -> Result<Vec<PageImage>, IngestError> {
        let document = load(pdf)?;

        let mut images = Vec::new();
        for (page_no, page_id) in document.get_pages() {
            let Some(xobjects) = page_xobjects(&document, page_id) else {
                continue;
            };

            for (name, object) in xobjects.iter() {
                let Some(stream) = resolve(&document, object).and_then(|obj| obj.as_stream().ok())
                else {
                    continue;
                };
                let is_image = stream
                    .dict
                    .get(b"Subtype")
                    .and_then(Object::as_name)
                    .is_ok_and(|subtype| subtype == b"Image");
                if !is_image {
                    continue;
                }

                match decode_image(&document, &stream.dict, stream) {
                    Ok(Some(image)) => images.push(PageImage {
                        page: page_no,
                        ..image
                    }),
                    Ok(None) => debug!(
                        page = page_no,
                        name = %String::from_utf8_lossy(name),
                        "skipping image with unsupported encoding"
                    ),
                    Err(error) => debug!(
                        page = page_no,
                        name = %String::from_utf8_lossy(name),
                        %error,
                        "skipping undecodable image"
                    ),
                }
            }
        }

        Ok(images)
    }
}

fn load(pdf: &[u8]) -> Result<Document, IngestError> {
    Document::load_mem(pdf).map_err(|error| IngestError::PdfParse(error.to_string()))
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

/// XObject dictionary of a page, following inherited `Resources`.
fn page_xobjects(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    loop {
        if let Some(resources) = node
            .get(b"Resources")
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_dict().ok())
        {
            return resources
                .get(b"XObject")
                .ok()
                .and_then(|object| resolve(document, object))
                .and_then(|object| object.as_dict().ok());
        }

        node = node
            .get(b"Parent")
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_dict().ok())?;
    }
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Result<u32, IngestError> {
    let value = dict
        .get(key)
        .and_then(Object::as_i64)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;
    u32::try_from(value).map_err(|_| {
        IngestError::PdfParse(format!(
            "image {} of {value} is out of range",
            String::from_utf8_lossy(key)
        ))
    })
}

fn decode_image(
    document: &Document,
    dict: &Dictionary,
    stream: &lopdf::Stream,
) -> Result<Option<PageImage>, IngestError> {
    let width = dimension(dict, b"Width")?;
    let height = dimension(dict, b"Height")?;
    let filters = filters(dict);

    if filters.iter().any(|filter| filter == b"DCTDecode") {
        return Ok(Some(PageImage {
            page: 0,
            mime_type: "image/jpeg",
            bytes: stream.content.clone(),
            width,
            height,
        }));
    }

    if filters
        .iter()
        .any(|filter| filter.as_slice() != b"FlateDecode")
    {
        return Ok(None);
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return Ok(None);
    }

    let components = match dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|object| resolve(document, object))
    {
        Some(Object::Name(name)) if name == b"DeviceRGB" => 3,
        Some(Object::Name(name)) if name == b"DeviceGray" => 1,
        _ => return Ok(None),
    };

    let raw = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|error| IngestError::PdfParse(error.to_string()))?
    };

    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(components))
        .ok_or_else(|| {
            IngestError::PdfParse(format!("image of {width}x{height} is too large"))
        })?;
    if raw.len() < expected {
        return Err(IngestError::PdfParse(format!(
            "image stream holds {} bytes, expected {expected}",
            raw.len()
        )));
    }

    let pixels = raw[..expected].to_vec();
    let image = if components == 3 {
        RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
    } else {
        GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
    };
    let Some(image) = image else {
        return Ok(None);
    };

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;

    Ok(Some(PageImage {
        page: 0,
        mime_type: "image/png",
        bytes,
        width,
        height,
    }))
}


#[cfg(test)]
mod tests {
    use super::fixtures::pdf_with;
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn page_text_is_extracted_from_memory() {
        let pdf = pdf_with(&["Trilobites are extinct arthropods."], false);
        let pages = LopdfExtractor.extract_pages(&pdf).expect("fixture pdf should parse");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 1);
        assert!(pages[0].text.contains("Trilobites"));
    }

    #[test]
    fn raw_rgb_images_are_reencoded_as_png() {
        let pdf = pdf_with(&["Figure 1"], true);
        let images = LopdfExtractor.extract_images(&pdf).expect("fixture pdf should parse");

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].page, 1);
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!((images[0].width, images[0].height), (2, 2));
        assert_eq!(
            image::guess_format(&images[0].bytes).ok(),
            Some(ImageFormat::Png)
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let result = LopdfExtractor.extract_pages(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn image_dimensions_must_fit_in_u32() {
        let negative = lopdf::dictionary! { "Width" => -2, "Height" => 2 };
        assert!(matches!(
            dimension(&negative, b"Width"),
            Err(IngestError::PdfParse(_))
        ));
        assert_eq!(dimension(&negative, b"Height").ok(), Some(2));

        let huge = lopdf::dictionary! { "Width" => i64::from(u32::MAX) + 1 };
        assert!(dimension(&huge, b"Width").is_err());
    }

    #[test]
    fn oversized_raw_image_is_rejected_before_allocating() {
        let document = Document::with_version("1.5");
        let stream = lopdf::Stream::new(
            lopdf::dictionary! {
                "Subtype" => "Image",
                "Width" => i64::from(u32::MAX),
                "Height" => i64::from(u32::MAX),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![0; 12],
        );
        let result = decode_image(&document, &stream.dict, &stream);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}
