//! Job orchestration
//!
//! Runs one container per call: create → start → observe → resolve. Output is
//! streamed to the caller's sink while a removal watcher races a fixed
//! deadline. Every terminal path leaves no container behind: auto-removal
//! covers normal exits, and timeouts, watcher failures and cancellation stop
//! or force-remove the container explicitly.

use crate::engine::{
    BindMount, ContainerEngine, ContainerSpec, HostConfig, LogChunk, OutputSource, WaitCondition,
    WaitResponse,
};
use crate::error::{EngineError, FactorError, JobError};
use crate::factor::ParameterArgumentVector;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// In-container path of the entry-point script.
pub const ENTRY_POINT_TARGET: &str = "/app/main.py";

/// Lets jobs reach services on the caller's host.
pub const HOST_GATEWAY_ALIAS: &str = "host.docker.internal:host-gateway";

/// What the container runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobImage {
    /// A built factor image
    Image(String),
    /// A stock base image with a standalone script bind-mounted as entry point
    Mounted { base_image: String, script: PathBuf },
}

impl JobImage {
    pub fn image_ref(&self) -> &str {
        match self {
            JobImage::Image(image) => image,
            JobImage::Mounted { base_image, .. } => base_image,
        }
    }
}

/// One job to run
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Container name
    pub name: String,
    pub image: JobImage,
    pub args: ParameterArgumentVector,
}

/// Lifecycle states of a job's container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Created,
    Started,
    Running,
    RemovedSuccess,
    RemovedFailure,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::RemovedSuccess | JobState::RemovedFailure | JobState::TimedOut
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::RemovedSuccess => "removed-success",
            JobState::RemovedFailure => "removed-failure",
            JobState::TimedOut => "timed-out",
        };
        f.write_str(name)
    }
}

/// Final disposition of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => f.write_str("succeeded"),
            JobStatus::Failed { reason } => write!(f, "failed: {}", reason),
            JobStatus::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Result of one job execution
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub container_id: String,
    pub name: String,
    pub status: JobStatus,
    pub exit_code: Option<i64>,
    /// Captured stdout and stderr, interleaved as produced
    pub output: String,
    pub output_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub deadline_secs: u64,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn final_state(&self) -> JobState {
        match self.status {
            JobStatus::Succeeded => JobState::RemovedSuccess,
            JobStatus::Failed { .. } => JobState::RemovedFailure,
            JobStatus::TimedOut => JobState::TimedOut,
        }
    }

    /// Map failed and timed-out outcomes onto the error taxonomy.
    pub fn into_result(self) -> Result<JobOutcome, FactorError> {
        match &self.status {
            JobStatus::Succeeded => Ok(self),
            JobStatus::Failed { reason } => Err(FactorError::RuntimeFailure {
                container_id: self.container_id.clone(),
                exit_code: self.exit_code,
                message: reason.clone(),
            }),
            JobStatus::TimedOut => Err(FactorError::Timeout {
                container_id: self.container_id.clone(),
                deadline: Duration::from_secs(self.deadline_secs),
            }),
        }
    }
}

/// Destination for live container output
pub trait OutputSink: Send + Sync {
    fn write_chunk(&self, chunk: &LogChunk);
}

/// Forwards container stdout/stderr to the process's own streams
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl OutputSink for StdioSink {
    fn write_chunk(&self, chunk: &LogChunk) {
        let result = match chunk.source {
            OutputSource::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&chunk.bytes).and_then(|_| out.flush())
            }
            OutputSource::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&chunk.bytes).and_then(|_| err.flush())
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Dropped container output");
        }
    }
}

/// Discards output; the outcome still captures it
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_chunk(&self, _chunk: &LogChunk) {}
}

/// Bounded buffer of captured output
#[derive(Debug)]
struct OutputCapture {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputCapture {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Upper bound on a single run
    pub deadline: Duration,
    /// Command the argument vector is appended to
    pub launch_command: Vec<String>,
    pub extra_hosts: Vec<String>,
    /// Bind target for mounted scripts
    pub entry_point_target: String,
    /// Grace period given to a timed-out container before it is killed
    pub stop_grace: Duration,
    /// Time the log pump gets to flush after the container is gone
    pub log_drain: Duration,
    pub max_captured_bytes: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60 * 60),
            launch_command: vec!["python".to_string(), ENTRY_POINT_TARGET.to_string()],
            extra_hosts: vec![HOST_GATEWAY_ALIAS.to_string()],
            entry_point_target: ENTRY_POINT_TARGET.to_string(),
            stop_grace: Duration::from_secs(10),
            log_drain: Duration::from_secs(2),
            max_captured_bytes: 1024 * 1024,
        }
    }
}

/// Removals scheduled by cancelled jobs that have not finished yet
static PENDING_REMOVALS: AtomicUsize = AtomicUsize::new(0);

/// Counts one scheduled removal until dropped, including when the runtime
/// drops the task before it finishes.
struct PendingRemoval;

impl PendingRemoval {
    fn register() -> Self {
        PENDING_REMOVALS.fetch_add(1, Ordering::SeqCst);
        PendingRemoval
    }
}

impl Drop for PendingRemoval {
    fn drop(&mut self) {
        PENDING_REMOVALS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait up to `grace` for the removals scheduled by cancelled jobs.
/// Returns false if some were still running when `grace` ran out.
pub async fn await_cancelled_removals(grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    while PENDING_REMOVALS.load(Ordering::SeqCst) > 0 {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Force-removes the container if the run future is dropped before a
/// terminal state is reached.
struct ContainerGuard {
    engine: Arc<dyn ContainerEngine>,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn new(engine: Arc<dyn ContainerEngine>, container_id: String) -> Self {
        Self {
            engine,
            container_id: Some(container_id),
        }
    }

    fn disarm(&mut self) {
        self.container_id = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = Arc::clone(&self.engine);
                let pending = PendingRemoval::register();
                warn!(container_id = %id, "Job cancelled, removing container");
                handle.spawn(async move {
                    let _pending = pending;
                    if let Err(e) = engine.remove_container(&id, true).await {
                        if !e.is_gone() {
                            error!(container_id = %id, error = %e, "Failed to remove cancelled container");
                        }
                    }
                });
            }
            Err(_) => {
                error!(container_id = %id, "Job cancelled outside a runtime; container not removed");
            }
        }
    }
}

/// How the race between the removal watcher and the deadline ended
enum Resolution {
    Exited(WaitResponse),
    WatchFailed(String),
    DeadlineElapsed,
}

/// Drives containers through their lifecycle on a shared engine
#[derive(Clone)]
pub struct JobOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    settings: JobSettings,
}

impl JobOrchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: JobSettings) -> Self {
        Self { engine, settings }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Container creation request for `spec`. Auto-removal is always on.
    pub fn container_spec(&self, spec: &JobSpec) -> ContainerSpec {
        let mut command = self.settings.launch_command.clone();
        command.extend(spec.args.to_args());

        let mounts = match &spec.image {
            JobImage::Image(_) => Vec::new(),
            JobImage::Mounted { script, .. } => vec![BindMount {
                source: script.clone(),
                target: self.settings.entry_point_target.clone(),
                read_only: true,
            }],
        };

        ContainerSpec {
            name: spec.name.clone(),
            image: spec.image.image_ref().to_string(),
            command,
            host: HostConfig {
                auto_remove: true,
                extra_hosts: self.settings.extra_hosts.clone(),
                mounts,
            },
        }
    }

    /// Run a job to a terminal state.
    ///
    /// Create and start failures are errors; everything after start is
    /// reported through the returned outcome. Dropping the future cancels the
    /// job and removes its container.
    pub async fn run(
        &self,
        spec: &JobSpec,
        sink: Arc<dyn OutputSink>,
    ) -> Result<JobOutcome, JobError> {
        let container_spec = self.container_spec(spec);
        let container_id = self
            .engine
            .create_container(&container_spec)
            .await
            .map_err(|source| JobError::Create {
                name: spec.name.clone(),
                image: container_spec.image.clone(),
                source,
            })?;
        let started_at = Utc::now();
        info!(
            container_id = %container_id,
            name = %spec.name,
            image = %container_spec.image,
            state = %JobState::Created,
            "Container created"
        );
        let mut guard = ContainerGuard::new(Arc::clone(&self.engine), container_id.clone());

        // The engine must accept the wait before start, or a fast exit with
        // auto-removal leaves nothing to wait on.
        let pending = match self
            .engine
            .wait_container(&container_id, WaitCondition::Removed)
            .await
        {
            Ok(pending) => pending,
            Err(source) => {
                self.remove_quietly(&container_id).await;
                guard.disarm();
                return Err(JobError::Watch {
                    container_id,
                    source,
                });
            }
        };
        let mut watcher = AbortOnDrop(tokio::spawn(pending));

        if let Err(source) = self.engine.start_container(&container_id).await {
            watcher.0.abort();
            self.remove_quietly(&container_id).await;
            guard.disarm();
            return Err(JobError::Start {
                container_id,
                source,
            });
        }
        debug!(container_id = %container_id, state = %JobState::Started, "Container started");

        let capture = Arc::new(Mutex::new(OutputCapture::new(
            self.settings.max_captured_bytes,
        )));
        let mut pump = AbortOnDrop(tokio::spawn(pump_logs(
            Arc::clone(&self.engine),
            container_id.clone(),
            sink,
            Arc::clone(&capture),
        )));
        debug!(container_id = %container_id, state = %JobState::Running, "Observing container");

        let resolution = match tokio::time::timeout(self.settings.deadline, &mut watcher.0).await {
            Ok(Ok(Ok(response))) => Resolution::Exited(response),
            Ok(Ok(Err(e))) => Resolution::WatchFailed(e.to_string()),
            Ok(Err(join_err)) => Resolution::WatchFailed(format!("watcher task failed: {}", join_err)),
            Err(_) => Resolution::DeadlineElapsed,
        };

        let (status, exit_code) = match resolution {
            Resolution::Exited(response) => {
                guard.disarm();
                // Let the pump flush what the engine already sent.
                let _ = tokio::time::timeout(self.settings.log_drain, &mut pump.0).await;
                match response.error {
                    None if response.status_code == 0 => (JobStatus::Succeeded, Some(0)),
                    None => (
                        JobStatus::Failed {
                            reason: format!("exited with status {}", response.status_code),
                        },
                        Some(response.status_code),
                    ),
                    Some(message) => (
                        JobStatus::Failed { reason: message },
                        Some(response.status_code),
                    ),
                }
            }
            Resolution::WatchFailed(reason) => {
                pump.0.abort();
                self.terminate(&container_id).await;
                guard.disarm();
                (JobStatus::Failed { reason }, None)
            }
            Resolution::DeadlineElapsed => {
                watcher.0.abort();
                pump.0.abort();
                warn!(
                    container_id = %container_id,
                    deadline_secs = self.settings.deadline.as_secs(),
                    "Job exceeded deadline, stopping container"
                );
                self.terminate(&container_id).await;
                guard.disarm();
                (JobStatus::TimedOut, None)
            }
        };
        drop(pump);

        let (output, output_truncated) = {
            let capture = capture.lock();
            (capture.text(), capture.truncated)
        };
        let outcome = JobOutcome {
            container_id,
            name: spec.name.clone(),
            status,
            exit_code,
            output,
            output_truncated,
            started_at,
            finished_at: Utc::now(),
            deadline_secs: self.settings.deadline.as_secs(),
        };

        let state = outcome.final_state();
        match &outcome.status {
            JobStatus::Succeeded => info!(
                container_id = %outcome.container_id,
                state = %state,
                "Job finished"
            ),
            _ => warn!(
                container_id = %outcome.container_id,
                state = %state,
                status = %outcome.status,
                exit_code = ?outcome.exit_code,
                "Job finished"
            ),
        }
        Ok(outcome)
    }

    /// Stop then force-remove; both tolerate the container already being gone.
    async fn terminate(&self, container_id: &str) {
        if let Err(e) = self
            .engine
            .stop_container(container_id, self.settings.stop_grace)
            .await
        {
            if !e.is_gone() {
                warn!(container_id, error = %e, "Failed to stop container");
            }
        }
        self.remove_quietly(container_id).await;
    }

    async fn remove_quietly(&self, container_id: &str) {
        match self.engine.remove_container(container_id, true).await {
            Ok(()) => debug!(container_id, "Container removed"),
            Err(e) if e.is_gone() => {}
            Err(e) => error!(container_id, error = %e, "Failed to remove container"),
        }
    }
}

/// Copy container output into the sink and the capture buffer until the
/// stream ends. Failures only end the pump.
async fn pump_logs(
    engine: Arc<dyn ContainerEngine>,
    container_id: String,
    sink: Arc<dyn OutputSink>,
    capture: Arc<Mutex<OutputCapture>>,
) {
    let mut stream = match engine.container_logs(&container_id).await {
        Ok(stream) => stream,
        Err(e) => {
            log_stream_error(&container_id, &e);
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                sink.write_chunk(&chunk);
                capture.lock().push(&chunk.bytes);
            }
            Err(e) => {
                log_stream_error(&container_id, &e);
                break;
            }
        }
    }
}

fn log_stream_error(container_id: &str, error: &EngineError) {
    if error.is_gone() {
        debug!(container_id, error = %error, "Log stream closed");
    } else {
        warn!(container_id, error = %error, "Log stream failed");
    }
}
