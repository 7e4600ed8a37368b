use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("document {0} has no uri to load")]
    MissingUri(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<FlowError>,
    },

    #[error("invalid target executor pattern: {0}")]
    InvalidTarget(#[from] regex::Error),

    #[error("invalid traversal path {path:?}: {reason}")]
    InvalidTraversal { path: String, reason: String },

    #[error("unknown executor {0:?}")]
    UnknownExecutor(String),

    #[error("invalid configuration for {uses}: {details}")]
    InvalidConfig { uses: String, details: String },

    #[error("unknown endpoint {0:?}")]
    UnknownEndpoint(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl FlowError {
    pub fn in_stage(stage: impl Into<String>, error: FlowError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(error),
        }
    }

    /// Innermost error once stage wrappers are peeled off.
    pub fn root(&self) -> &FlowError {
        match self {
            FlowError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
