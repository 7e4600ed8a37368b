//! Ordered chain of executors with regex based request routing.

use crate::error::FlowError;
use crate::executors::{build_executor, Executor, ExecutorContext};
use crate::models::{DocumentArray, Endpoint, Parameters};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Routes index requests to the indexing chain and the shared indexer.
pub const INDEX_TARGET: &str = "(index_*|all_*)";
/// Routes search requests to the query chain and the shared indexer.
pub const SEARCH_TARGET: &str = "(search_*|all_*)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub uses: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub uses_with: Value,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, uses: impl Into<String>, uses_with: Value) -> Self {
        Self {
            name: name.into(),
            uses: uses.into(),
            uses_with,
        }
    }
}

/// The eleven stages of the PDF search flow, in execution order.
pub fn pdf_search_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("index_table_extractor", "pdf-table-extractor", Value::Null),
        StageSpec::new("index_segmenter", "pdf-segmenter", Value::Null),
        StageSpec::new(
            "index_tagger",
            "element-type-tagger",
            json!({"traversal_paths": "@c"}),
        ),
        StageSpec::new("index_sentencizer", "sentencizer", json!({"traversal_paths": "@c"})),
        StageSpec::new("index_tags_copier", "tags-copier", json!({"traversal_paths": "@c"})),
        StageSpec::new("index_flattener", "chunk-flattener", json!({"traversal_paths": "@r"})),
        StageSpec::new(
            "index_image_processor",
            "image-preprocessor",
            json!({"traversal_paths": "@c"}),
        ),
        StageSpec::new(
            "search_image_processor",
            "image-preprocessor",
            json!({"traversal_paths": "@r"}),
        ),
        StageSpec::new("index_encoder", "clip-encoder", json!({"traversal_paths": "@c"})),
        StageSpec::new("search_encoder", "clip-encoder", json!({"traversal_paths": "@r"})),
        StageSpec::new(
            "all_indexer",
            "vector-indexer",
            json!({
                "index_traversal_paths": "@c",
                "search_traversal_paths": "@r,c",
                "columns": [["element_type", "str"]],
                "n_dim": 512,
            }),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub position: usize,
    pub name: String,
    pub uses: String,
}

struct Stage {
    name: String,
    executor: Arc<dyn Executor>,
}

#[derive(Default)]
pub struct Flow {
    stages: Vec<Stage>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.stages.push(Stage {
            name: name.into(),
            executor,
        });
        self
    }

    /// Builds every stage through the executor registry. Stage names must be unique.
    pub fn from_specs(specs: &[StageSpec], context: &ExecutorContext) -> Result<Self, FlowError> {
        let mut seen = HashSet::new();
        let mut flow = Flow::new();
        for spec in specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(FlowError::InvalidConfig {
                    uses: spec.uses.clone(),
                    details: format!("stage name {:?} is declared twice", spec.name),
                });
            }
            let executor = build_executor(&spec.uses, &spec.uses_with, context)
                .map_err(|error| FlowError::in_stage(&spec.name, error))?;
            flow = flow.add(&spec.name, executor);
        }
        info!(stages = flow.stages.len(), "flow built");
        Ok(flow)
    }

    pub fn stages(&self) -> Vec<StageInfo> {
        self.stages
            .iter()
            .enumerate()
            .map(|(position, stage)| StageInfo {
                position,
                name: stage.name.clone(),
                uses: stage.executor.uses().to_string(),
            })
            .collect()
    }

    /// Runs the request through the stages in declaration order. With a
    /// `target_executor` pattern only stages whose name matches it from the
    /// start take part.
    pub async fn post(
        &self,
        endpoint: Endpoint,
        mut docs: DocumentArray,
        parameters: &Parameters,
        target_executor: Option<&str>,
    ) -> Result<DocumentArray, FlowError> {
        let target = target_executor
            .map(|pattern| Regex::new(&format!("^(?:{pattern})")))
            .transpose()?;

        let started = Instant::now();
        let mut executed = 0usize;
        for stage in &self.stages {
            if target
                .as_ref()
                .is_some_and(|target| !target.is_match(&stage.name))
            {
                continue;
            }
            if !stage.executor.handles(endpoint) {
                continue;
            }

            let stage_started = Instant::now();
            stage
                .executor
                .handle(endpoint, &mut docs, parameters)
                .await
                .map_err(|error| FlowError::in_stage(&stage.name, error))?;
            executed += 1;
            debug!(
                stage = %stage.name,
                %endpoint,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "stage finished"
            );
        }

        info!(
            %endpoint,
            target = target_executor.unwrap_or("*"),
            stages = executed,
            docs = docs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request processed"
        );
        Ok(docs)
    }
}
