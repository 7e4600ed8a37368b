use crate::error::IngestError;
use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{base64::Base64, serde_as};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

pub const ELEMENT_TYPE_TAG: &str = "element_type";
pub const TABLE_CONTENT_TAG: &str = "table_content";
pub const PAGE_TAG: &str = "page";
pub const COSINE_SCORE: &str = "cosine";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Text,
    Image,
    Table,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Text => "text",
            ElementType::Image => "image",
            ElementType::Table => "table",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ElementType::Text),
            "image" => Ok(ElementType::Image),
            "table" => Ok(ElementType::Table),
            other => Err(IngestError::InvalidArgument(format!(
                "unknown element type {other:?}, expected text, image or table"
            ))),
        }
    }
}

/// Channel-first image tensor (`[channels, height, width]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageTensor {
    pub shape: [usize; 3],
    pub data: Vec<f32>,
}

impl ImageTensor {
    pub fn channels(&self) -> usize {
        self.shape[0]
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Whether `data` holds exactly `channels * height * width` values.
    /// Tensors arriving over the wire are not trusted to.
    pub fn is_consistent(&self) -> bool {
        self.shape
            .iter()
            .try_fold(1usize, |len, dim| len.checked_mul(*dim))
            .is_some_and(|len| len == self.data.len())
    }

    pub fn at(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.data[(channel * self.height() + y) * self.width() + x]
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor: Option<ImageTensor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Document>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, f32>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            ..Default::default()
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            mime_type: Some("text/plain".to_string()),
            ..Self::new()
        }
    }

    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let mime_type = mime_guess::from_path(&uri)
            .first()
            .map(|mime| mime.essence_str().to_string());
        Self {
            uri: Some(uri),
            mime_type,
            ..Self::new()
        }
    }

    pub fn from_blob(blob: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            blob: Some(blob),
            mime_type: Some(mime_type.into()),
            ..Self::new()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Reads the file behind `uri` into `blob`.
    pub fn load_uri_to_blob(&mut self) -> Result<(), IngestError> {
        let uri = self
            .uri
            .as_deref()
            .ok_or_else(|| IngestError::MissingUri(self.id.clone()))?;
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        self.blob = Some(std::fs::read(path)?);
        if self.mime_type.is_none() {
            self.mime_type = mime_guess::from_path(path)
                .first()
                .map(|mime| mime.essence_str().to_string());
        }
        Ok(())
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.tags
            .get(ELEMENT_TYPE_TAG)
            .and_then(Value::as_str)
            .and_then(|value| value.parse().ok())
    }

    pub fn set_element_type(&mut self, element_type: ElementType) {
        self.tags.insert(
            ELEMENT_TYPE_TAG.to_string(),
            Value::String(element_type.as_str().to_string()),
        );
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|text| !text.trim().is_empty())
    }

    pub fn is_pdf(&self) -> bool {
        if self.mime_type.as_deref() == Some("application/pdf") {
            return true;
        }
        if let Some(blob) = &self.blob {
            return blob.starts_with(b"%PDF");
        }
        self.uri
            .as_deref()
            .and_then(|uri| Path::new(uri).extension())
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }

    pub fn is_image(&self) -> bool {
        if self.tensor.is_some() {
            return true;
        }
        if self
            .mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"))
        {
            return true;
        }
        self.blob
            .as_deref()
            .is_some_and(|blob| image::guess_format(blob).is_ok())
    }

    pub fn score(&self, name: &str) -> Option<f32> {
        self.scores.get(name).copied()
    }

    /// Copy of the document without heavy per-request payloads.
    pub fn stripped_for_storage(&self) -> Document {
        Document {
            tensor: None,
            embedding: None,
            chunks: Vec::new(),
            matches: Vec::new(),
            scores: BTreeMap::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct DocumentArray(pub Vec<Document>);

impl DocumentArray {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn into_inner(self) -> Vec<Document> {
        self.0
    }

    pub fn load_uri_to_blob(&mut self) -> Result<(), IngestError> {
        for doc in self.iter_mut() {
            doc.load_uri_to_blob()?;
        }
        Ok(())
    }

    /// All matches of all documents, in order.
    pub fn matches(&self) -> Vec<&Document> {
        self.iter().flat_map(|doc| doc.matches.iter()).collect()
    }
}

impl Deref for DocumentArray {
    type Target = Vec<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DocumentArray {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Document>> for DocumentArray {
    fn from(value: Vec<Document>) -> Self {
        Self(value)
    }
}

impl FromIterator<Document> for DocumentArray {
    fn from_iter<T: IntoIterator<Item = Document>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DocumentArray {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Index,
    Search,
    Delete,
    Clear,
    Status,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Index => "index",
            Endpoint::Search => "search",
            Endpoint::Delete => "delete",
            Endpoint::Clear => "clear",
            Endpoint::Status => "status",
        }
    }

    /// Whether requests on this endpoint carry content that stages transform.
    pub fn carries_content(&self) -> bool {
        matches!(self, Endpoint::Index | Endpoint::Search)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = crate::error::FlowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim_start_matches('/') {
            "index" => Ok(Endpoint::Index),
            "search" => Ok(Endpoint::Search),
            "delete" => Ok(Endpoint::Delete),
            "clear" => Ok(Endpoint::Clear),
            "status" => Ok(Endpoint::Status),
            other => Err(crate::error::FlowError::UnknownEndpoint(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Parameters {
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            limit: None,
        }
    }
}
