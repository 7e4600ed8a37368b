use crate::embeddings::{ClipModel, HashingClipModel, RemoteClipModel, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::{FlowError, IngestError};
use crate::executors::ExecutorContext;
use crate::flow::{pdf_search_stages, StageSpec};
use crate::stores::IndexBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 60787;
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub host: String,
    pub port: u16,
    pub workspace: PathBuf,
    pub n_dim: usize,
    pub limit: usize,
    /// CLIP service URL; the local hashing model is used when unset.
    pub clip_endpoint: Option<String>,
    pub clip_api_key: Option<String>,
    pub index_backend: IndexBackend,
    /// JSON file with a list of stages replacing the built-in flow.
    pub flow_file: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workspace: PathBuf::from("workspace"),
            n_dim: DEFAULT_EMBEDDING_DIMENSIONS,
            limit: DEFAULT_LIMIT,
            clip_endpoint: None,
            clip_api_key: None,
            index_backend: IndexBackend::Local,
            flow_file: None,
        }
    }
}

impl FlowConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn clip_model(&self) -> Arc<dyn ClipModel> {
        match &self.clip_endpoint {
            Some(endpoint) => Arc::new(RemoteClipModel::new(
                endpoint,
                self.clip_api_key.clone(),
                self.n_dim,
            )),
            None => Arc::new(HashingClipModel::new(self.n_dim)),
        }
    }

    pub fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            clip: self.clip_model(),
            index_backend: self.index_backend.clone(),
            workspace: self.workspace.clone(),
        }
    }

    /// Stages from `flow_file` if set, otherwise the built-in PDF search flow
    /// with the configured `n_dim` and `limit` applied to the indexer.
    pub fn stage_specs(&self) -> Result<Vec<StageSpec>, FlowError> {
        if let Some(path) = &self.flow_file {
            return load_stage_specs(path);
        }

        let mut specs = pdf_search_stages();
        for spec in &mut specs {
            if spec.uses == crate::executors::indexer::USES {
                if let Some(uses_with) = spec.uses_with.as_object_mut() {
                    uses_with.insert("n_dim".to_string(), self.n_dim.into());
                    uses_with.insert("limit".to_string(), self.limit.into());
                }
            }
        }
        Ok(specs)
    }
}

pub fn load_stage_specs(path: &Path) -> Result<Vec<StageSpec>, FlowError> {
    let bytes = std::fs::read(path).map_err(IngestError::from)?;
    serde_json::from_slice(&bytes).map_err(|error| FlowError::InvalidConfig {
        uses: path.display().to_string(),
        details: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_the_flow_port() {
        let config = FlowConfig::default();
        assert_eq!(config.address(), "0.0.0.0:60787");
        assert_eq!(config.n_dim, 512);
        assert_eq!(config.index_backend, IndexBackend::Local);
    }

    #[test]
    fn indexer_picks_up_configured_dimensions() -> Result<(), FlowError> {
        let config = FlowConfig {
            n_dim: 64,
            limit: 3,
            ..Default::default()
        };
        let specs = config.stage_specs()?;
        let indexer = specs
            .iter()
            .find(|spec| spec.name == "all_indexer")
            .map(|spec| spec.uses_with.clone())
            .unwrap_or_default();
        assert_eq!(indexer["n_dim"], 64);
        assert_eq!(indexer["limit"], 3);
        Ok(())
    }

    #[test]
    fn flow_file_replaces_builtin_stages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flow.json");
        std::fs::write(
            &path,
            r#"[{"name": "index_tagger", "uses": "element-type-tagger"}]"#,
        )?;

        let config = FlowConfig {
            flow_file: Some(path),
            ..Default::default()
        };
        let specs = config.stage_specs()?;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].uses, "element-type-tagger");
        Ok(())
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() -> Result<(), serde_json::Error> {
        let config: FlowConfig = serde_json::from_str(r#"{"port": 8080}"#)?;
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, DEFAULT_HOST);
        Ok(())
    }
}
