//! Presents search results by element type: images go to `images/`, tables
//! to `csvs/`, everything else is printed as text.

use crate::error::IngestError;
use crate::executors::image_preprocessor::to_rgb_image;
use crate::models::{Document, ElementType, TABLE_CONTENT_TAG};
use image::{ImageFormat, RgbImage};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const IMAGES_DIR: &str = "images";
pub const CSVS_DIR: &str = "csvs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Image {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    Table {
        path: PathBuf,
        rows: Vec<Vec<String>>,
    },
    Text(String),
}

pub struct Renderer {
    out_dir: PathBuf,
}

impl Renderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn render_all<W: Write>(
        &self,
        docs: &[&Document],
        out: &mut W,
    ) -> Result<Vec<Rendered>, IngestError> {
        docs.iter()
            .enumerate()
            .map(|(idx, doc)| self.render(idx, doc, out))
            .collect()
    }

    /// Renders the `idx`-th result. Documents without a known `element_type`
    /// are treated as text.
    pub fn render<W: Write>(
        &self,
        idx: usize,
        doc: &Document,
        out: &mut W,
    ) -> Result<Rendered, IngestError> {
        match doc.element_type() {
            Some(ElementType::Image) => self.render_image(idx, doc, out),
            Some(ElementType::Table) => self.render_table(idx, doc, out),
            Some(ElementType::Text) | None => {
                let text = doc.text.clone().unwrap_or_default();
                writeln!(out, "{text}")?;
                Ok(Rendered::Text(text))
            }
        }
    }

    fn render_image<W: Write>(
        &self,
        idx: usize,
        doc: &Document,
        out: &mut W,
    ) -> Result<Rendered, IngestError> {
        let image = decode_image(doc)?;
        let path = prepare(&self.out_dir.join(IMAGES_DIR), &format!("{idx}-{}.png", doc.id))?;
        image.save_with_format(&path, ImageFormat::Png)?;

        let (width, height) = image.dimensions();
        writeln!(out, "[image] {} ({width}x{height})", path.display())?;
        debug!(path = %path.display(), "wrote image result");
        Ok(Rendered::Image {
            path,
            width,
            height,
        })
    }

    fn render_table<W: Write>(
        &self,
        idx: usize,
        doc: &Document,
        out: &mut W,
    ) -> Result<Rendered, IngestError> {
        let content = doc
            .tags
            .get(TABLE_CONTENT_TAG)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!(
                    "table result {} has no {TABLE_CONTENT_TAG} tag",
                    doc.id
                ))
            })?;
        let path = prepare(&self.out_dir.join(CSVS_DIR), &format!("{idx}-{}.csv", doc.id))?;
        fs::write(&path, content)?;

        let rows = read_csv(&path)?;
        write_table(&rows, out)?;
        debug!(path = %path.display(), rows = rows.len(), "wrote table result");
        Ok(Rendered::Table { path, rows })
    }
}

fn prepare(dir: &Path, file_name: &str) -> Result<PathBuf, IngestError> {
    fs::create_dir_all(dir)?;
    Ok(dir.join(file_name))
}

fn decode_image(doc: &Document) -> Result<RgbImage, IngestError> {
    if let Some(image) = doc.tensor.as_ref().and_then(to_rgb_image) {
        return Ok(image);
    }
    match doc.blob.as_deref() {
        Some(blob) => Ok(image::load_from_memory(blob)?.to_rgb8()),
        None => Err(IngestError::InvalidArgument(format!(
            "image result {} has neither tensor nor blob",
            doc.id
        ))),
    }
}

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Header row first, then data rows prefixed by their index, columns padded.
fn write_table<W: Write>(rows: &[Vec<String>], out: &mut W) -> Result<(), IngestError> {
    let Some((header, body)) = rows.split_first() else {
        writeln!(out, "(empty table)")?;
        return Ok(());
    };

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (column, cell) in row.iter().enumerate() {
            widths[column] = widths[column].max(cell.chars().count());
        }
    }
    let index_width = body.len().saturating_sub(1).to_string().len();

    let format_row = |row: &[String]| {
        widths
            .iter()
            .enumerate()
            .map(|(column, &width)| {
                let cell = row.get(column).map(String::as_str).unwrap_or("");
                format!("{cell:>width$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    writeln!(out, "{:index_width$}  {}", "", format_row(header.as_slice()))?;
    for (index, row) in body.iter().enumerate() {
        writeln!(out, "{index:>index_width$}  {}", format_row(row.as_slice()))?;
    }
    Ok(())
}
