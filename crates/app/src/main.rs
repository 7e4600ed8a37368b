use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_flow_core::{
    Document, DocumentArray, ElementType, Endpoint, Filter, Flow, FlowClient, FlowConfig,
    IndexBackend, Parameters, Renderer, INDEX_TARGET, SEARCH_TARGET,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-flow", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// PDFs to index before serving: glob pattern, directory or single file.
    #[arg(long, env = "PDF_FLOW_INPUT", default_value = "data/*.pdf")]
    input: String,

    /// Serve the existing index without indexing anything first. Without it
    /// an input that matches nothing or fails to load stops the server.
    #[arg(long, default_value_t = false)]
    skip_index: bool,

    #[arg(long, env = "PDF_FLOW_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PDF_FLOW_PORT", default_value = "60787")]
    port: u16,

    /// Directory holding the local index snapshot.
    #[arg(long, env = "PDF_FLOW_WORKSPACE", default_value = "workspace")]
    workspace: PathBuf,

    /// Embedding size shared by the encoder and the indexer.
    #[arg(long, env = "PDF_FLOW_N_DIM", default_value = "512")]
    n_dim: usize,

    /// Default number of matches per query.
    #[arg(long, env = "PDF_FLOW_LIMIT", default_value = "10")]
    limit: usize,

    /// CLIP service URL; the local hashing model is used when unset.
    #[arg(long, env = "PDF_FLOW_CLIP_ENDPOINT")]
    clip_endpoint: Option<String>,

    #[arg(long, env = "PDF_FLOW_CLIP_API_KEY", hide_env_values = true)]
    clip_api_key: Option<String>,

    /// Qdrant base URL; the local on-disk index is used when unset.
    #[arg(long, env = "PDF_FLOW_QDRANT_URL")]
    qdrant_url: Option<String>,

    #[arg(long, env = "PDF_FLOW_QDRANT_COLLECTION", default_value = "pdf_elements")]
    qdrant_collection: String,

    /// JSON stage list replacing the built-in flow.
    #[arg(long, env = "PDF_FLOW_FLOW_FILE")]
    flow_file: Option<PathBuf>,
}

impl ServeArgs {
    fn config(&self) -> FlowConfig {
        FlowConfig {
            host: self.host.clone(),
            port: self.port,
            workspace: self.workspace.clone(),
            n_dim: self.n_dim,
            limit: self.limit,
            clip_endpoint: self.clip_endpoint.clone(),
            clip_api_key: self.clip_api_key.clone(),
            index_backend: match &self.qdrant_url {
                Some(url) => IndexBackend::Qdrant {
                    url: url.clone(),
                    collection: self.qdrant_collection.clone(),
                },
                None => IndexBackend::Local,
            },
            flow_file: self.flow_file.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build the flow, index the input PDFs and serve requests until interrupted.
    Serve(ServeArgs),
    /// Send PDFs to a running flow for indexing.
    Index {
        #[arg(long, env = "PDF_FLOW_INPUT", default_value = "data/*.pdf")]
        input: String,

        #[arg(long, env = "PDF_FLOW_URL", default_value = "grpc://0.0.0.0:60787")]
        host: String,

        #[arg(long, default_value = "1")]
        request_size: usize,
    },
    /// Query a running flow with a text or an image and render the matches.
    Search {
        /// Text query.
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        text: Option<String>,

        /// Image file used as the query.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Element types to keep (text, image, table).
        #[arg(long, value_delimiter = ',', default_value = "text,image,table")]
        element_types: Vec<ElementType>,

        /// Number of matches; the indexer default applies when unset.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, env = "PDF_FLOW_URL", default_value = "grpc://0.0.0.0:60787")]
        host: String,

        /// Directory receiving `images/` and `csvs/`.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-flow boot"
    );

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Index {
            input,
            host,
            request_size,
        } => {
            let docs = DocumentArray::load_files(&input)?;
            let total = docs.len();
            let client = FlowClient::new(&host)?;
            client
                .post(
                    Endpoint::Index,
                    docs,
                    request_size,
                    &Parameters::default(),
                    Some(INDEX_TARGET),
                    true,
                )
                .await
                .with_context(|| format!("indexing {input} through {host}"))?;
            println!("{total} documents indexed at {}", Utc::now().to_rfc3339());
            Ok(())
        }
        Command::Search {
            text,
            image,
            element_types,
            limit,
            host,
            out,
        } => {
            let mut query = match (text, image) {
                (Some(text), _) => Document::from_text(text),
                (None, Some(path)) => Document::from_uri(path.to_string_lossy()),
                (None, None) => anyhow::bail!("either --text or --image is required"),
            };
            if query.uri.is_some() {
                query.load_uri_to_blob()?;
            }

            let parameters = Parameters {
                filter: Some(Filter::element_types(&element_types)),
                limit,
            };
            let client = FlowClient::new(&host)?;
            let results = client
                .post(
                    Endpoint::Search,
                    DocumentArray::from(vec![query]),
                    1,
                    &parameters,
                    Some(SEARCH_TARGET),
                    true,
                )
                .await
                .with_context(|| format!("searching through {host}"))?;

            let matches = results.matches();
            if matches.is_empty() {
                println!("no matches");
                return Ok(());
            }

            let renderer = Renderer::new(&out);
            let mut stdout = std::io::stdout().lock();
            renderer.render_all(&matches, &mut stdout)?;
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.config();
    let specs = config.stage_specs()?;
    let flow = Arc::new(Flow::from_specs(&specs, &config.executor_context())?);

    if !args.skip_index {
        let docs = DocumentArray::load_files(&args.input)
            .with_context(|| format!("loading {}", args.input))?;
        let total = docs.len();
        flow.post(Endpoint::Index, docs, &Parameters::default(), Some(INDEX_TARGET))
            .await
            .with_context(|| format!("indexing {}", args.input))?;
        info!(input = %args.input, documents = total, "indexed input");
    }

    let listener = TcpListener::bind(config.address())
        .await
        .with_context(|| format!("binding {}", config.address()))?;
    pdf_flow_core::server::serve(listener, flow, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "could not listen for ctrl-c");
        }
    })
    .await?;
    Ok(())
}
