//! Error types for factor generation, image builds and container jobs.
//!
//! Each layer returns its own error kind with enough context (file, image tag,
//! container ID) to be logged by the caller. Nothing here is retried.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Static validation failures of a factor definition, raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Factor name is empty")]
    EmptyFactorName,

    #[error("Invalid factor name '{0}': expected an ASCII identifier without path separators")]
    InvalidFactorName(String),

    #[error("Factor '{factor}' declares parameter '{name}' more than once")]
    DuplicateParameter { factor: String, name: String },

    #[error("Factor '{factor}' parameter '{name}' has unrecognized type '{type_tag}'")]
    UnknownParameterType {
        factor: String,
        name: String,
        type_tag: String,
    },

    #[error("Factor '{factor}' parameter '{name}' is not a valid identifier")]
    InvalidParameterName { factor: String, name: String },

    #[error("Factor '{factor}' parameter '{name}' shadows a built-in flag")]
    ReservedParameterName { factor: String, name: String },
}

/// The four files that make up a build context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFile {
    EntryPoint,
    ComputationSource,
    DependencyManifest,
    BuildFile,
}

impl fmt::Display for ArtifactFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactFile::EntryPoint => "entry point",
            ArtifactFile::ComputationSource => "computation source",
            ArtifactFile::DependencyManifest => "dependency manifest",
            ArtifactFile::BuildFile => "build file",
        };
        f.write_str(label)
    }
}

/// Artifact generation failures. Partially written directories are removed
/// before one of these is returned.
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("Build directory already exists: {0}")]
    DirectoryExists(PathBuf),

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {file} at {path}: {source}")]
    WriteFile {
        file: ArtifactFile,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FilesystemError {
    /// Which generated file failed, when the failure is tied to one.
    pub fn failed_file(&self) -> Option<ArtifactFile> {
        match self {
            FilesystemError::WriteFile { file, .. } => Some(*file),
            _ => None,
        }
    }
}

/// Raw failures reported by (or while talking to) the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine connection failed: {0}")]
    Transport(String),

    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Engine conflict: {0}")]
    Conflict(String),

    #[error("Engine returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode engine response: {0}")]
    Decode(String),
}

impl EngineError {
    /// True when the engine says the object is already gone or going away.
    pub fn is_gone(&self) -> bool {
        matches!(self, EngineError::NotFound(_) | EngineError::Conflict(_))
    }
}

/// Image build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to archive build context {dir}: {source}")]
    Archive {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine rejected build of '{tag}': {source}")]
    Engine {
        tag: String,
        #[source]
        source: EngineError,
    },

    #[error("Build of '{tag}' failed: {message}")]
    Failed { tag: String, message: String },

    #[error("Build of '{tag}' returned an empty response")]
    EmptyResponse { tag: String },

    #[error("Build of '{tag}' returned an unparsable line '{line}': {message}")]
    UnparsableResponse {
        tag: String,
        line: String,
        message: String,
    },

    #[error("Build of '{tag}' response carries no image ID")]
    MissingImageId { tag: String },
}

/// Failures that stop a job before it runs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to create container '{name}' from '{image}': {source}")]
    Create {
        name: String,
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to watch container {container_id}: {source}")]
    Watch {
        container_id: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to start container {container_id}: {source}")]
    Start {
        container_id: String,
        #[source]
        source: EngineError,
    },
}

/// Top-level error surfaced by the pipeline and the CLI.
#[derive(Debug, Error)]
pub enum FactorError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Job(#[from] JobError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Container {container_id} failed{}: {message}", exit_code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    RuntimeFailure {
        container_id: String,
        exit_code: Option<i64>,
        message: String,
    },

    #[error("Container {container_id} exceeded the {}s deadline and was stopped", deadline.as_secs())]
    Timeout {
        container_id: String,
        deadline: Duration,
    },

    #[error("Unknown factor: {0}")]
    UnknownFactor(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for FactorError {
    fn from(err: config::ConfigError) -> Self {
        FactorError::Config(err.to_string())
    }
}
