//! End-to-end: catalog → generate → build → run, against a scripted engine

use crate::integration::test_utils::{CollectingSink, FakeEngine, FakeExit};
use factorbox::catalog::FactorCatalog;
use factorbox::cli::{Cli, RunContext};
use factorbox::config::FactorboxConfig;
use factorbox::error::FactorError;
use factorbox::factor::ParameterArgumentVector;
use factorbox::job::{JobSettings, JobStatus, NullSink};
use factorbox::pipeline::{FactorPipeline, PipelineSettings};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn pipeline(engine: Arc<FakeEngine>, work_dir: &std::path::Path, deadline: Duration) -> FactorPipeline {
    FactorPipeline::new(
        engine,
        PipelineSettings {
            work_dir: work_dir.to_path_buf(),
            base_image: "python:3.10".to_string(),
            keep_context: false,
            job: JobSettings {
                deadline,
                stop_grace: Duration::from_secs(0),
                log_drain: Duration::from_millis(100),
                ..JobSettings::default()
            },
        },
    )
}

#[tokio::test]
async fn test_poc_job_that_never_finishes_times_out_cleanly() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::new(FakeExit::Never));
    let pipeline = pipeline(engine.clone(), temp_dir.path(), Duration::from_millis(300));
    let poc = FactorCatalog::builtin().get("POC").unwrap();

    let args = ParameterArgumentVector::new()
        .flag("task_id", "t1")
        .flag("interval", "1min");
    let outcome = pipeline
        .build_and_run(poc, args, Arc::new(NullSink))
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::TimedOut);
    assert_eq!(engine.live_count(), 0);
    assert!(!temp_dir.path().join("poc").exists());
    assert!(matches!(outcome.into_result(), Err(FactorError::Timeout { .. })));
}

#[tokio::test]
async fn test_macd_build_and_run_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::exiting(0));
    let pipeline = pipeline(engine.clone(), temp_dir.path(), Duration::from_secs(5));
    let macd = FactorCatalog::builtin().get("macd").unwrap();

    let args = ParameterArgumentVector::from_tokens([
        "--task_id", "t2", "--interval", "5min", "--fast", "12", "--slow", "26", "--dea", "9",
    ])
    .unwrap();
    let outcome = pipeline
        .build_and_run(macd, args, Arc::new(NullSink))
        .await
        .unwrap();

    assert!(outcome.is_success());
    let created = engine.created();
    assert_eq!(created[0].image, "0123abcd4567");
    assert_eq!(created[0].name, "macd");
    assert_eq!(created[0].command.len(), 2 + 10);
}

#[test]
fn test_cli_run_reports_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::new(FakeExit::Never));
    let mut config = FactorboxConfig::default();
    config.job.deadline_secs = 1;
    config.job.stop_grace_secs = 0;

    let ctx = RunContext::from_config(temp_dir.path().to_path_buf(), config)
        .unwrap()
        .with_engine(engine.clone())
        .with_output_sink(Arc::new(CollectingSink::default()));
    let cli = Cli::try_parse_from([
        "factorbox", "run", "POC", "--build", "--", "--task_id", "t1", "--interval", "1min",
    ])
    .unwrap();

    let err = ctx.execute(&cli.command).unwrap_err();
    assert!(matches!(err, FactorError::Timeout { .. }));
    assert_eq!(factorbox::cli::exit_code(&err), 124);
    assert_eq!(engine.live_count(), 0);
}

#[test]
fn test_cli_mounted_run_prints_json_outcome() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(FakeEngine::exiting(0));
    let sink = Arc::new(CollectingSink::default());

    let ctx = RunContext::from_config(temp_dir.path().to_path_buf(), FactorboxConfig::default())
        .unwrap()
        .with_engine(engine.clone())
        .with_output_sink(sink.clone());
    let cli = Cli::try_parse_from([
        "factorbox", "run", "POC", "--mount", "--format", "json", "--", "--task_id", "t1",
    ])
    .unwrap();

    let output = ctx.execute(&cli.command).unwrap();
    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["status"]["kind"], "succeeded");
    assert_eq!(json["name"], "poc");
    assert_eq!(sink.text(), "computing\n");
    assert!(!engine.calls().iter().any(|c| c.starts_with("build")));

    let script = temp_dir.path().join(".factorbox/build/poc-standalone.py");
    assert_eq!(engine.created()[0].host.mounts[0].source, dunce::canonicalize(script).unwrap());
}
