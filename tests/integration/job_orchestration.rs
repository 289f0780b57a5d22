//! Integration tests for the job orchestrator

use crate::integration::test_utils::{CollectingSink, FakeEngine, FakeExit};
use factorbox::engine::LogChunk;
use factorbox::error::{EngineError, FactorError, JobError};
use factorbox::factor::ParameterArgumentVector;
use factorbox::job::{JobImage, JobOrchestrator, JobSettings, JobSpec, JobStatus, NullSink};
use std::sync::Arc;
use std::time::Duration;

fn settings(deadline: Duration) -> JobSettings {
    JobSettings {
        deadline,
        stop_grace: Duration::from_secs(0),
        log_drain: Duration::from_millis(200),
        ..JobSettings::default()
    }
}

fn job(name: &str) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        image: JobImage::Image(name.to_string()),
        args: ParameterArgumentVector::new()
            .flag("task_id", "t1")
            .flag("interval", "1min"),
    }
}

#[tokio::test]
async fn test_successful_job_streams_output() {
    let mut engine = FakeEngine::exiting(0);
    engine.output = vec![
        LogChunk::stdout("loading\n"),
        LogChunk::stderr("warning: slow query\n"),
        LogChunk::stdout("done\n"),
    ];
    let engine = Arc::new(engine);
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));
    let sink = Arc::new(CollectingSink::default());

    let outcome = orchestrator.run(&job("poc"), sink.clone()).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.output, "loading\nwarning: slow query\ndone\n");
    assert_eq!(sink.text(), outcome.output);
    assert!(outcome.finished_at >= outcome.started_at);
    assert_eq!(engine.live_count(), 0);

    let calls = engine.calls();
    assert!(calls.contains(&"wait c0001 removed".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("stop")));

    let created = engine.created();
    assert!(created[0].host.auto_remove);
    assert_eq!(
        created[0].command,
        vec!["python", "/app/main.py", "--task_id", "t1", "--interval", "1min"]
    );
}

#[tokio::test]
async fn test_job_exiting_on_start_still_succeeds() {
    let engine = Arc::new(FakeEngine::new(FakeExit::OnStart { code: 0 }));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));

    let outcome = orchestrator.run(&job("poc"), Arc::new(NullSink)).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(
        engine.calls()[..3],
        ["create poc", "wait c0001 removed", "start c0001"]
    );
    assert_eq!(engine.live_count(), 0);
}

#[tokio::test]
async fn test_nonzero_exit_maps_to_runtime_failure() {
    let engine = Arc::new(FakeEngine::exiting(2));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));

    let outcome = orchestrator.run(&job("poc"), Arc::new(NullSink)).await.unwrap();
    assert_eq!(outcome.exit_code, Some(2));
    assert_eq!(engine.live_count(), 0);

    match outcome.into_result() {
        Err(FactorError::RuntimeFailure {
            container_id,
            exit_code,
            ..
        }) => {
            assert_eq!(container_id, "c0001");
            assert_eq!(exit_code, Some(2));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_deadline_leaves_no_container() {
    let engine = Arc::new(FakeEngine::new(FakeExit::Never));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_millis(150)));

    let outcome = orchestrator.run(&job("poc"), Arc::new(NullSink)).await.unwrap();

    assert_eq!(outcome.status, JobStatus::TimedOut);
    assert_eq!(engine.live_count(), 0);
    let calls = engine.calls();
    let stop = calls.iter().position(|c| c == "stop c0001").unwrap();
    let remove = calls.iter().position(|c| c == "remove c0001").unwrap();
    assert!(stop < remove);
}

#[tokio::test]
async fn test_concurrent_jobs_on_shared_engine() {
    let engine = Arc::new(FakeEngine::exiting(0));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));

    let names = ["poc", "macd", "rsi", "vwap"];
    let runs = names.iter().map(|name| {
        let orchestrator = orchestrator.clone();
        let spec = job(name);
        async move { orchestrator.run(&spec, Arc::new(NullSink)).await }
    });
    let outcomes = futures::future::join_all(runs).await;

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Ok(outcome) if outcome.status == JobStatus::Succeeded)));
    assert_eq!(engine.live_count(), 0);
}

#[tokio::test]
async fn test_same_name_runs_conflict_at_create() {
    let engine = Arc::new(FakeEngine::new(FakeExit::After {
        delay: Duration::from_millis(100),
        code: 0,
    }));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));

    let first = job("poc");
    let second = job("poc");
    let (a, b) = tokio::join!(
        orchestrator.run(&first, Arc::new(NullSink)),
        orchestrator.run(&second, Arc::new(NullSink))
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(JobError::Create {
            source: EngineError::Conflict(_),
            ..
        })
    )));
    assert_eq!(engine.live_count(), 0);
}

#[tokio::test]
async fn test_mounted_job_binds_script_read_only() {
    let engine = Arc::new(FakeEngine::exiting(0));
    let orchestrator = JobOrchestrator::new(engine.clone(), settings(Duration::from_secs(5)));
    let spec = JobSpec {
        name: "poc".to_string(),
        image: JobImage::Mounted {
            base_image: "python:3.10".to_string(),
            script: std::path::PathBuf::from("/tmp/poc-standalone.py"),
        },
        args: ParameterArgumentVector::new(),
    };

    orchestrator.run(&spec, Arc::new(NullSink)).await.unwrap();

    let created = engine.created();
    assert_eq!(created[0].image, "python:3.10");
    assert_eq!(created[0].host.mounts[0].target, "/app/main.py");
    assert!(created[0].host.mounts[0].read_only);
    assert_eq!(
        created[0].host.extra_hosts,
        vec!["host.docker.internal:host-gateway"]
    );
}
