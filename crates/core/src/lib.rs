pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod executors;
pub mod extractor;
pub mod filter;
pub mod flow;
pub mod ingest;
pub mod models;
pub mod render;
pub mod server;
pub mod stores;
pub mod tables;
pub mod traversal;

pub use client::FlowClient;
pub use config::{load_stage_specs, FlowConfig};
pub use embeddings::{
    CharacterNgramEmbedder, ClipInput, ClipModel, Embedder, HashingClipModel, RemoteClipModel,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{FlowError, IngestError, SearchError};
pub use executors::{build_executor, Executor, ExecutorContext};
pub use extractor::{LopdfExtractor, PageImage, PageText, PdfExtractor};
pub use filter::{Condition, Filter};
pub use flow::{pdf_search_stages, Flow, StageInfo, StageSpec, INDEX_TARGET, SEARCH_TARGET};
pub use ingest::{discover_files, discover_pdf_files};
pub use models::{
    Document, DocumentArray, ElementType, Endpoint, ImageTensor, Parameters, COSINE_SCORE,
    ELEMENT_TYPE_TAG, PAGE_TAG, TABLE_CONTENT_TAG,
};
pub use render::{Rendered, Renderer};
pub use server::{FlowRequest, FlowResponse};
pub use stores::{IndexBackend, LocalIndex, QdrantIndex, VectorIndex};
pub use tables::{Table, TableDetector};
pub use traversal::TraversalPaths;
