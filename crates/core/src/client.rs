use crate::error::SearchError;
use crate::models::{DocumentArray, Endpoint, Parameters};
use crate::server::{FlowRequest, FlowResponse};
use reqwest::Client;
use tracing::info;
use url::Url;

/// Talks to a flow served over HTTP.
pub struct FlowClient {
    base: Url,
    client: Client,
}

impl FlowClient {
    /// Accepts `http://`, `https://` or `grpc://` hosts; a bare `host:port`
    /// is taken as plain HTTP.
    pub fn new(host: &str) -> Result<Self, SearchError> {
        let host = host.trim();
        let normalized = if let Some(rest) = host.strip_prefix("grpc://") {
            format!("http://{rest}")
        } else if let Some(rest) = host.strip_prefix("grpcs://") {
            format!("https://{rest}")
        } else if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        let mut base = Url::parse(&normalized)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            client: Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Sends `docs` in batches of `request_size` and concatenates the
    /// returned documents in order.
    pub async fn post(
        &self,
        endpoint: Endpoint,
        docs: DocumentArray,
        request_size: usize,
        parameters: &Parameters,
        target_executor: Option<&str>,
        show_progress: bool,
    ) -> Result<DocumentArray, SearchError> {
        let url = self.base.join(endpoint.as_str())?;
        let docs = docs.into_inner();
        let batch_size = if request_size == 0 {
            docs.len().max(1)
        } else {
            request_size
        };

        let batches = if docs.is_empty() {
            vec![Vec::new()]
        } else {
            docs.chunks(batch_size).map(<[_]>::to_vec).collect::<Vec<_>>()
        };
        let total = batches.len();

        let mut collected = DocumentArray::new();
        for (position, batch) in batches.into_iter().enumerate() {
            let request = FlowRequest {
                docs: DocumentArray::from(batch),
                parameters: parameters.clone(),
                target_executor: target_executor.map(str::to_string),
            };

            let response = self.client.post(url.clone()).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SearchError::BackendResponse {
                    backend: "flow".to_string(),
                    details: format!("{status}: {body}"),
                });
            }

            let payload: FlowResponse = response.json().await?;
            collected.extend(payload.docs);

            if show_progress {
                info!(
                    %endpoint,
                    batch = position + 1,
                    batches = total,
                    docs = collected.len(),
                    "request progress"
                );
            }
        }
        Ok(collected)
    }
}
