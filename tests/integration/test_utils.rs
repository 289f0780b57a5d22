//! Shared test utilities for integration tests
//!
//! A scripted in-memory container engine and an environment guard for tests
//! that read configuration from the process environment.

use async_trait::async_trait;
use factorbox::engine::{
    BuildRequest, ByteStream, ContainerEngine, ContainerSpec, LogChunk, LogStream, PendingWait,
    WaitCondition, WaitResponse,
};
use factorbox::error::EngineError;
use factorbox::job::OutputSink;
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How containers created by a [`FakeEngine`] finish
#[derive(Debug, Clone)]
pub enum FakeExit {
    /// Runs until stopped
    Never,
    /// Exits with the code after the delay, then is auto-removed
    After { delay: Duration, code: i64 },
    /// Exits and is auto-removed as soon as it starts
    OnStart { code: i64 },
}

/// Engine double that behaves like a daemon with auto-removing containers:
/// names are unique among live containers and stop/remove on a missing
/// container report NotFound.
pub struct FakeEngine {
    pub exit: FakeExit,
    pub output: Vec<LogChunk>,
    pub build_response: Vec<String>,
    live: Arc<Mutex<HashMap<String, String>>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicU64,
}

impl FakeEngine {
    pub fn new(exit: FakeExit) -> Self {
        Self {
            exit,
            output: vec![LogChunk::stdout("computing\n")],
            build_response: vec![
                r#"{"stream":"Step 1/4 : FROM python:3.10"}"#.to_string(),
                r#"{"stream":"Successfully built 0123abcd4567\n"}"#.to_string(),
            ],
            live: Arc::new(Mutex::new(HashMap::new())),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn exiting(code: i64) -> Self {
        Self::new(FakeExit::After {
            delay: Duration::from_millis(20),
            code,
        })
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_image(&self, request: BuildRequest) -> Result<ByteStream, EngineError> {
        self.record(format!("build {}", request.tags.join(",")));
        if request.context.is_empty() {
            return Err(EngineError::Status {
                status: 400,
                message: "empty build context".to_string(),
            });
        }
        let chunks: Vec<Result<Vec<u8>, EngineError>> = self
            .build_response
            .iter()
            .map(|line| Ok(format!("{}\r\n", line).into_bytes()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(format!("create {}", spec.name));
        let mut live = self.live.lock();
        if live.values().any(|name| name == &spec.name) {
            return Err(EngineError::Conflict(format!(
                "container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let id = format!("c{:04}", self.next_id.fetch_add(1, Ordering::SeqCst));
        live.insert(id.clone(), spec.name.clone());
        self.created.lock().push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {}", id));
        let mut live = self.live.lock();
        if !live.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        if let FakeExit::OnStart { .. } = self.exit {
            live.remove(id);
        }
        Ok(())
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream, EngineError> {
        self.record(format!("logs {}", id));
        let chunks: Vec<Result<LogChunk, EngineError>> =
            self.output.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> Result<PendingWait, EngineError> {
        self.record(format!("wait {} {}", id, condition.as_str()));
        if !self.live.lock().contains_key(id) {
            return Err(EngineError::NotFound(format!("No such container: {}", id)));
        }
        let live = Arc::clone(&self.live);
        let id = id.to_string();
        let exit = self.exit.clone();
        Ok(Box::pin(async move {
            let code = match exit {
                FakeExit::Never => futures::future::pending().await,
                FakeExit::After { delay, code } => {
                    tokio::time::sleep(delay).await;
                    live.lock().remove(&id);
                    code
                }
                FakeExit::OnStart { code } => {
                    while live.lock().contains_key(&id) {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    code
                }
            };
            Ok(WaitResponse {
                status_code: code,
                error: None,
            })
        }))
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        self.record(format!("stop {}", id));
        // Auto-remove follows the stop
        match self.live.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        self.record(format!("remove {}", id));
        match self.live.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    fn engine_name(&self) -> &str {
        "fake"
    }
}

/// Sink that keeps everything it receives
#[derive(Default)]
pub struct CollectingSink {
    bytes: Mutex<Vec<u8>>,
}

impl CollectingSink {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl OutputSink for CollectingSink {
    fn write_chunk(&self, chunk: &LogChunk) {
        self.bytes.lock().extend_from_slice(&chunk.bytes);
    }
}

/// Global mutex serializing environment access across all tests
static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with the given variables set (`Some`) or removed (`None`),
/// restoring the previous values afterwards.
pub fn with_env<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, value)| {
            let previous = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            (key.to_string(), previous)
        })
        .collect();

    let result = f();

    for (key, value) in saved {
        match value {
            Some(v) => std::env::set_var(&key, v),
            None => std::env::remove_var(&key),
        }
    }
    result
}
