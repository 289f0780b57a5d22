//! Integration tests for image builds against a scripted engine

use crate::integration::test_utils::{FakeEngine, FakeExit};
use factorbox::artifact::ArtifactGenerator;
use factorbox::builder::{ImageBuilder, ImageId};
use factorbox::catalog::FactorCatalog;
use factorbox::error::BuildError;
use factorbox::template;
use std::sync::Arc;
use tempfile::TempDir;

fn poc_context(root: &std::path::Path) -> factorbox::artifact::BuildContext {
    let poc = FactorCatalog::builtin().get("POC").unwrap();
    let entry_point = template::render_entry_point(poc).unwrap();
    ArtifactGenerator::new(root, "python:3.10")
        .generate(poc, &entry_point)
        .unwrap()
}

#[tokio::test]
async fn test_build_returns_id_from_last_line() {
    let temp_dir = TempDir::new().unwrap();
    let context = poc_context(temp_dir.path());
    let engine = Arc::new(FakeEngine::new(FakeExit::Never));

    let id = ImageBuilder::new(engine.clone())
        .build(&context, context.image_name())
        .await
        .unwrap();

    assert_eq!(id, ImageId::new("0123abcd4567"));
    assert_eq!(engine.calls(), vec!["build poc".to_string()]);
}

#[tokio::test]
async fn test_engine_error_line_fails_build() {
    let temp_dir = TempDir::new().unwrap();
    let context = poc_context(temp_dir.path());
    let mut engine = FakeEngine::new(FakeExit::Never);
    engine.build_response = vec![
        r#"{"stream":"Step 4/4 : RUN pip install -r requirements.txt --no-cache-dir"}"#.to_string(),
        r#"{"errorDetail":{"code":1,"message":"The command '/bin/sh -c pip install' returned a non-zero code: 1"},"error":"The command '/bin/sh -c pip install' returned a non-zero code: 1"}"#.to_string(),
    ];

    let err = ImageBuilder::new(Arc::new(engine))
        .build(&context, "poc")
        .await
        .unwrap_err();
    match err {
        BuildError::Failed { tag, message } => {
            assert_eq!(tag, "poc");
            assert!(message.contains("non-zero code"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_response_without_id_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let context = poc_context(temp_dir.path());
    let mut engine = FakeEngine::new(FakeExit::Never);
    engine.build_response = vec![r#"{"stream":"Successfully tagged poc:latest\n"}"#.to_string()];

    let err = ImageBuilder::new(Arc::new(engine))
        .build(&context, "poc")
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingImageId { .. }));
}

#[tokio::test]
async fn test_build_leaves_context_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let context = poc_context(temp_dir.path());
    let engine = Arc::new(FakeEngine::new(FakeExit::Never));

    ImageBuilder::new(engine).build(&context, "poc").await.unwrap();
    assert_eq!(context.files().len(), 4);
    assert!(context.files().iter().all(|f| f.exists()));
}
