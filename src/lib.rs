//! factorbox: Factor Artifact Generation and Container Job Orchestration
//!
//! Turns a declarative factor definition (name, typed parameters, opaque
//! computation source) into a runnable container image and executes it as a
//! time-bounded job that always cleans up its container.

pub mod artifact;
pub mod builder;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod factor;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod template;

pub use builder::ImageId;
pub use error::FactorError;
pub use factor::{FactorDefinition, ParameterArgumentVector, ParameterSpec};
pub use job::{JobOutcome, JobStatus};
pub use pipeline::FactorPipeline;
