//! HTTP front of a flow: `POST /{endpoint}` runs a request through the stages.

use crate::error::{FlowError, IngestError, SearchError};
use crate::flow::{Flow, StageInfo};
use crate::models::{DocumentArray, Endpoint, Parameters};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowRequest {
    #[serde(default)]
    pub docs: DocumentArray,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_executor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowResponse {
    pub docs: DocumentArray,
}

pub fn router(flow: Arc<Flow>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/flow", get(list_stages))
        .route("/:endpoint", post(post_endpoint))
        .with_state(flow)
        .layer(TraceLayer::new_for_http())
}

/// Serves `flow` on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, flow: Arc<Flow>, shutdown: F) -> Result<(), FlowError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr().map_err(SearchError::from)?;
    info!(%address, "flow is serving");
    axum::serve(listener, router(flow))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(SearchError::from)?;
    info!(%address, "flow stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_stages(State(flow): State<Arc<Flow>>) -> Json<Vec<StageInfo>> {
    Json(flow.stages())
}

async fn post_endpoint(
    State(flow): State<Arc<Flow>>,
    Path(endpoint): Path<String>,
    Json(request): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, FlowError> {
    let endpoint: Endpoint = endpoint.parse()?;
    let docs = flow
        .post(
            endpoint,
            request.docs,
            &request.parameters,
            request.target_executor.as_deref(),
        )
        .await?;
    Ok(Json(FlowResponse { docs }))
}

fn status_of(error: &FlowError) -> (StatusCode, &'static str) {
    match error.root() {
        FlowError::UnknownEndpoint(_) => (StatusCode::NOT_FOUND, "unknown_endpoint"),
        FlowError::InvalidTarget(_) => (StatusCode::BAD_REQUEST, "invalid_target"),
        FlowError::InvalidTraversal { .. } | FlowError::InvalidConfig { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_config")
        }
        FlowError::Search(SearchError::InvalidFilter(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_filter")
        }
        FlowError::Ingest(
            IngestError::InvalidArgument(_)
            | IngestError::MissingUri(_)
            | IngestError::PdfParse(_),
        ) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_document")
        }
        FlowError::Search(SearchError::Http(_) | SearchError::BackendResponse { .. })
        | FlowError::Embedding(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let (status, kind) = status_of(&self);
        let message = self.to_string();
        warn!(status = status.as_u16(), kind, %message, "request failed");

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}
