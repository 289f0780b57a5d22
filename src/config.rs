//! Configuration System
//!
//! Layered configuration for the engine connection, image builds, job
//! execution, the factor catalog and logging. Sources are merged in order:
//! built-in defaults, the user's global file, workspace files, then
//! `FACTORBOX__SECTION__KEY` environment variables.

use crate::artifact::DEFAULT_BASE_IMAGE;
use crate::error::FactorError;
use crate::job::{JobSettings, ENTRY_POINT_TARGET, HOST_GATEWAY_ALIAS};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FactorboxConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub job: JobConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Container engine connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Engine endpoint; falls back to DOCKER_HOST, then the local TCP port
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API version path prefix, e.g. "v1.41"
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Bound on short control requests (create, start, stop, remove)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_version() -> String {
    "v1.41".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: default_api_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Build context generation and image builds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Base runtime image of generated build files
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Root for build contexts and standalone scripts, relative to the workspace
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Keep build contexts after a successful build
    #[serde(default)]
    pub keep_context: bool,
}

fn default_base_image() -> String {
    DEFAULT_BASE_IMAGE.to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".factorbox/build")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            work_dir: default_work_dir(),
            keep_context: false,
        }
    }
}

impl BuildConfig {
    /// `work_dir` resolved against `workspace_root` when relative.
    pub fn work_dir_in(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.work_dir)
    }
}

/// Job execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Upper bound on one job
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default = "default_extra_hosts")]
    pub extra_hosts: Vec<String>,

    /// Process the argument vector is appended to
    #[serde(default = "default_launch_command")]
    pub launch_command: Vec<String>,

    #[serde(default = "default_entry_point_target")]
    pub entry_point_target: String,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_log_drain_ms")]
    pub log_drain_ms: u64,

    #[serde(default = "default_max_captured_output_bytes")]
    pub max_captured_output_bytes: usize,
}

fn default_deadline_secs() -> u64 {
    60 * 60
}

fn default_extra_hosts() -> Vec<String> {
    vec![HOST_GATEWAY_ALIAS.to_string()]
}

fn default_launch_command() -> Vec<String> {
    vec!["python".to_string(), ENTRY_POINT_TARGET.to_string()]
}

fn default_entry_point_target() -> String {
    ENTRY_POINT_TARGET.to_string()
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_log_drain_ms() -> u64 {
    2000
}

fn default_max_captured_output_bytes() -> usize {
    1024 * 1024
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            extra_hosts: default_extra_hosts(),
            launch_command: default_launch_command(),
            entry_point_target: default_entry_point_target(),
            stop_grace_secs: default_stop_grace_secs(),
            log_drain_ms: default_log_drain_ms(),
            max_captured_output_bytes: default_max_captured_output_bytes(),
        }
    }
}

impl JobConfig {
    pub fn settings(&self) -> JobSettings {
        JobSettings {
            deadline: Duration::from_secs(self.deadline_secs),
            launch_command: self.launch_command.clone(),
            extra_hosts: self.extra_hosts.clone(),
            entry_point_target: self.entry_point_target.clone(),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            log_drain: Duration::from_millis(self.log_drain_ms),
            max_captured_bytes: self.max_captured_output_bytes,
        }
    }
}

/// Factor catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// Directory of `*.toml` factor manifests, relative to the workspace
    #[serde(default = "default_factors_dir")]
    pub factors_dir: PathBuf,
}

fn default_factors_dir() -> PathBuf {
    PathBuf::from("factors")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            factors_dir: default_factors_dir(),
        }
    }
}

impl CatalogConfig {
    pub fn factors_dir_in(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.factors_dir)
    }
}

fn resolve(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Engine: {0}")]
    Engine(String),
    #[error("Build: {0}")]
    Build(String),
    #[error("Job: {0}")]
    Job(String),
    #[error("Catalog: {0}")]
    Catalog(String),
    #[error("Logging: {0}")]
    Logging(String),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(endpoint) = &self.endpoint {
            if endpoint.trim().is_empty() {
                return Err("Endpoint cannot be empty when set".to_string());
            }
        }
        if !self.api_version.is_empty() && !self.api_version.starts_with('v') {
            return Err(format!(
                "API version '{}' must look like 'v1.41'",
                self.api_version
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err("Connect timeout must be positive".to_string());
        }
        Ok(())
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_image.trim().is_empty() {
            return Err("Base image cannot be empty".to_string());
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err("Work directory cannot be empty".to_string());
        }
        Ok(())
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.deadline_secs == 0 {
            return Err("Deadline must be positive".to_string());
        }
        if self.launch_command.is_empty() {
            return Err("Launch command cannot be empty".to_string());
        }
        if !self.entry_point_target.starts_with('/') {
            return Err(format!(
                "Entry point target '{}' must be an absolute container path",
                self.entry_point_target
            ));
        }
        if self.max_captured_output_bytes == 0 {
            return Err("Output capture limit must be positive".to_string());
        }
        Ok(())
    }
}

impl FactorboxConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.engine.validate() {
            errors.push(ValidationError::Engine(e));
        }
        if let Err(e) = self.build.validate() {
            errors.push(ValidationError::Build(e));
        }
        if let Err(e) = self.job.validate() {
            errors.push(ValidationError::Job(e));
        }
        if self.catalog.factors_dir.as_os_str().is_empty() {
            errors.push(ValidationError::Catalog(
                "Factors directory cannot be empty".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ValidationError::Logging(format!(
                "Invalid format '{}'",
                self.logging.format
            )));
        }
        if !matches!(
            self.logging.output.as_str(),
            "stdout" | "stderr" | "file" | "both"
        ) {
            errors.push(ValidationError::Logging(format!(
                "Invalid output '{}'",
                self.logging.output
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// [`validate`](Self::validate) folded into a single error.
    pub fn ensure_valid(&self) -> Result<(), FactorError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            FactorError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }
}
