// src/core/transform.rs

//! The document and metadata transform pipeline.
//!
//! Stages are configured by name (`transform.pipeline=stageA,stageB`) with
//! per-stage parameters under `transform.pipeline.<name>.<key>`. Content
//! flows through each stage in order; the input buffer of a stage is
//! immutable, so a stage produces its output into a fresh buffer. A failing
//! stage that is not required is skipped with its input passed through
//! unchanged; a failing required stage aborts the document.

use crate::core::errors::FeedgateError;
use crate::core::metadata::Metadata;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Per-document parameters visible to every stage (doc id, content type,
/// authn state).
pub type TransformParams = BTreeMap<String, String>;

/// One pipeline stage.
pub trait DocumentTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Non-required stages are best-effort: their failure skips their
    /// effect instead of failing the document.
    fn is_required(&self) -> bool {
        true
    }

    /// Reads `content_in`, writes the stage's output into `content_out`,
    /// and may rewrite `metadata` in place.
    fn transform(
        &self,
        content_in: &[u8],
        content_out: &mut Vec<u8>,
        metadata: &mut Metadata,
        params: &TransformParams,
    ) -> Result<(), FeedgateError>;
}

/// Builds a stage from its per-stage configuration map.
pub type TransformFactory =
    dyn Fn(&BTreeMap<String, String>) -> Result<Arc<dyn DocumentTransform>, FeedgateError>
        + Send
        + Sync;

/// Name-to-factory registry used when instantiating pipelines from config.
#[derive(Default)]
pub struct TransformRegistry {
    factories: HashMap<String, Box<TransformFactory>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BTreeMap<String, String>) -> Result<Arc<dyn DocumentTransform>, FeedgateError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiates the pipeline named by a comma-separated stage list.
    /// `stage_config` maps a stage name to its parameter map.
    pub fn build_pipeline(
        &self,
        stage_list: &str,
        stage_config: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<TransformPipeline, FeedgateError> {
        let mut stages = Vec::new();
        for name in stage_list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let factory = self.factories.get(name).ok_or_else(|| {
                FeedgateError::InvalidConfiguration(format!(
                    "transform stage '{name}' is not registered"
                ))
            })?;
            let empty = BTreeMap::new();
            let params = stage_config.get(name).unwrap_or(&empty);
            stages.push(factory(params)?);
        }
        Ok(TransformPipeline { stages })
    }
}

/// An ordered list of stages applied to each served document.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    stages: Vec<Arc<dyn DocumentTransform>>,
}

impl TransformPipeline {
    pub fn new(stages: Vec<Arc<dyn DocumentTransform>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Threads content and metadata through every stage. Returns the final
    /// content bytes.
    pub fn apply(
        &self,
        content: Vec<u8>,
        metadata: &mut Metadata,
        params: &TransformParams,
    ) -> Result<Vec<u8>, FeedgateError> {
        let mut current = content;
        for stage in &self.stages {
            let mut out = Vec::new();
            let mut staged_metadata = metadata.clone();
            match stage.transform(&current, &mut out, &mut staged_metadata, params) {
                Ok(()) => {
                    current = out;
                    metadata.overwrite_with(&staged_metadata);
                }
                Err(e) if stage.is_required() => {
                    return Err(FeedgateError::TransformFailed(format!(
                        "required stage '{}' failed: {e}",
                        stage.name()
                    )));
                }
                Err(e) => {
                    // Best-effort stage: prior bytes and metadata pass
                    // through unchanged.
                    warn!("Skipping transform stage '{}': {e}", stage.name());
                }
            }
        }
        Ok(current)
    }
}
