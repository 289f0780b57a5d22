//! Integration tests for factor generation, image builds and container jobs

mod artifact_generation;
mod config_integration;
mod end_to_end;
mod image_build;
mod job_orchestration;
pub mod test_utils;
