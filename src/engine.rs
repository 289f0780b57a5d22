//! Container Engine Abstraction
//!
//! The narrow contract the builder and orchestrator consume: build an image,
//! create/start a container, stream its logs, wait for it, and stop or remove
//! it. A single engine handle is shared across concurrent jobs and holds no
//! job-specific state.

use crate::config::EngineConfig;
use crate::error::{EngineError, FactorError};
use async_trait::async_trait;
use futures::{Future, Stream};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod docker;

pub use docker::DockerEngine;

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>;

/// Demultiplexed container output
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogChunk, EngineError>> + Send>>;

/// Exit status of a wait the engine has already accepted
pub type PendingWait = Pin<Box<dyn Future<Output = Result<WaitResponse, EngineError>> + Send>>;

/// Which container stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// A piece of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub source: OutputSource,
    pub bytes: Vec<u8>,
}

impl LogChunk {
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: OutputSource::Stdout,
            bytes: bytes.into(),
        }
    }

    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: OutputSource::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// Image build submission
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tar archive of the build context
    pub context: Vec<u8>,
    pub tags: Vec<String>,
    /// Ask the engine for the final image ID only
    pub suppress_output: bool,
}

/// Read-only bind of a host file into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Host-side settings of a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostConfig {
    pub auto_remove: bool,
    pub extra_hosts: Vec<String>,
    pub mounts: Vec<BindMount>,
}

/// Container creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub host: HostConfig,
}

/// Condition a wait resolves on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    NotRunning,
    NextExit,
    Removed,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::NotRunning => "not-running",
            WaitCondition::NextExit => "next-exit",
            WaitCondition::Removed => "removed",
        }
    }
}

/// Exit status reported when a wait resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResponse {
    pub status_code: i64,
    pub error: Option<String>,
}

/// Container engine client trait
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Submit a build; returns the engine's JSON-lines response stream
    async fn build_image(&self, request: BuildRequest) -> Result<ByteStream, EngineError>;

    /// Create a container and return its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Follow the container's combined output
    async fn container_logs(&self, id: &str) -> Result<LogStream, EngineError>;

    /// Register a wait for `condition`. Returns once the engine has accepted
    /// it; the returned future resolves with the exit status.
    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> Result<PendingWait, EngineError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Engine name for logs
    fn engine_name(&self) -> &str;
}

/// Create the shared engine handle from configuration
pub fn connect(config: &EngineConfig) -> Result<Arc<dyn ContainerEngine>, FactorError> {
    let engine = DockerEngine::from_config(config)?;
    Ok(Arc::new(engine))
}
