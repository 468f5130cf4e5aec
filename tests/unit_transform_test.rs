use feedgate::core::FeedgateError;
use feedgate::core::metadata::Metadata;
use feedgate::core::transform::{
    DocumentTransform, TransformParams, TransformPipeline, TransformRegistry,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Appends a suffix to the content and records its visit in the metadata.
struct SuffixTransform {
    name: String,
    suffix: Vec<u8>,
    required: bool,
    fail: bool,
}

impl DocumentTransform for SuffixTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn transform(
        &self,
        content_in: &[u8],
        content_out: &mut Vec<u8>,
        metadata: &mut Metadata,
        _params: &TransformParams,
    ) -> Result<(), FeedgateError> {
        if self.fail {
            return Err(FeedgateError::Internal("stage exploded".to_string()));
        }
        content_out.extend_from_slice(content_in);
        content_out.extend_from_slice(&self.suffix);
        metadata.add("visited-by", self.name.clone());
        Ok(())
    }
}

fn stage(name: &str, suffix: &[u8], required: bool, fail: bool) -> Arc<dyn DocumentTransform> {
    Arc::new(SuffixTransform {
        name: name.to_string(),
        suffix: suffix.to_vec(),
        required,
        fail,
    })
}

#[test]
fn test_stages_run_in_order() {
    let pipeline =
        TransformPipeline::new(vec![stage("a", b"-a", true, false), stage("b", b"-b", true, false)]);
    let mut metadata = Metadata::new();
    let out = pipeline
        .apply(b"doc".to_vec(), &mut metadata, &TransformParams::new())
        .unwrap();
    assert_eq!(out, b"doc-a-b");
    let visited: Vec<&str> = metadata.values_of("visited-by").unwrap().iter().map(String::as_str).collect();
    assert_eq!(visited, vec!["a", "b"]);
}

#[test]
fn test_non_required_failure_passes_bytes_through() {
    let pipeline = TransformPipeline::new(vec![
        stage("broken", b"-x", false, true),
        stage("after", b"-after", true, false),
    ]);
    let mut metadata = Metadata::new();
    let out = pipeline
        .apply(b"doc".to_vec(), &mut metadata, &TransformParams::new())
        .unwrap();
    // The broken stage's effect is skipped entirely; downstream sees the
    // prior bytes unchanged.
    assert_eq!(out, b"doc-after");
    assert_eq!(
        metadata.values_of("visited-by").unwrap().len(),
        1
    );
}

#[test]
fn test_required_failure_aborts_pipeline() {
    let pipeline = TransformPipeline::new(vec![
        stage("broken", b"-x", true, true),
        stage("after", b"-after", true, false),
    ]);
    let mut metadata = Metadata::new();
    let err = pipeline
        .apply(b"doc".to_vec(), &mut metadata, &TransformParams::new())
        .unwrap_err();
    assert!(matches!(err, FeedgateError::TransformFailed(_)));
}

#[test]
fn test_failed_stage_does_not_leak_metadata_changes() {
    struct MetaThenFail;
    impl DocumentTransform for MetaThenFail {
        fn name(&self) -> &str {
            "meta-then-fail"
        }
        fn is_required(&self) -> bool {
            false
        }
        fn transform(
            &self,
            _content_in: &[u8],
            _content_out: &mut Vec<u8>,
            metadata: &mut Metadata,
            _params: &TransformParams,
        ) -> Result<(), FeedgateError> {
            metadata.add("half", "done");
            Err(FeedgateError::Internal("after mutating".to_string()))
        }
    }

    let pipeline = TransformPipeline::new(vec![Arc::new(MetaThenFail)]);
    let mut metadata = Metadata::new();
    pipeline
        .apply(b"doc".to_vec(), &mut metadata, &TransformParams::new())
        .unwrap();
    assert!(metadata.is_empty());
}

#[test]
fn test_registry_builds_pipeline_from_stage_list() {
    let mut registry = TransformRegistry::new();
    registry.register("suffix", |params| {
        let suffix = params
            .get("text")
            .cloned()
            .unwrap_or_else(|| "-default".to_string());
        Ok(stage("suffix", suffix.as_bytes(), true, false))
    });

    let mut stage_config = BTreeMap::new();
    stage_config.insert(
        "suffix".to_string(),
        BTreeMap::from([("text".to_string(), "-configured".to_string())]),
    );
    let pipeline = registry.build_pipeline("suffix", &stage_config).unwrap();

    let mut metadata = Metadata::new();
    let out = pipeline
        .apply(b"doc".to_vec(), &mut metadata, &TransformParams::new())
        .unwrap();
    assert_eq!(out, b"doc-configured");
}

#[test]
fn test_registry_rejects_unknown_stage() {
    let registry = TransformRegistry::new();
    let err = registry
        .build_pipeline("nonexistent", &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, FeedgateError::InvalidConfiguration(_)));
}

#[test]
fn test_empty_stage_list_is_empty_pipeline() {
    let registry = TransformRegistry::new();
    let pipeline = registry.build_pipeline("", &BTreeMap::new()).unwrap();
    assert!(pipeline.is_empty());
}
