//! Factor pipeline
//!
//! Wires the stages together: render → generate → build → run. Each stage is
//! also callable on its own. Rendering and validation happen before any
//! filesystem or engine work.

use crate::artifact::{ArtifactGenerator, BuildContext};
use crate::builder::{ImageBuilder, ImageId};
use crate::config::FactorboxConfig;
use crate::engine::ContainerEngine;
use crate::error::FactorError;
use crate::factor::{FactorDefinition, ParameterArgumentVector};
use crate::job::{JobImage, JobOrchestrator, JobOutcome, JobSettings, JobSpec, OutputSink};
use crate::template;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Settings for one pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root for build contexts and standalone scripts
    pub work_dir: PathBuf,
    pub base_image: String,
    pub keep_context: bool,
    pub job: JobSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &FactorboxConfig, workspace_root: &Path) -> Self {
        Self {
            work_dir: config.build.work_dir_in(workspace_root),
            base_image: config.build.base_image.clone(),
            keep_context: config.build.keep_context,
            job: config.job.settings(),
        }
    }
}

pub struct FactorPipeline {
    generator: ArtifactGenerator,
    builder: ImageBuilder,
    orchestrator: JobOrchestrator,
    base_image: String,
    keep_context: bool,
}

impl FactorPipeline {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: PipelineSettings) -> Self {
        Self {
            generator: ArtifactGenerator::new(settings.work_dir, settings.base_image.clone()),
            builder: ImageBuilder::new(Arc::clone(&engine)),
            orchestrator: JobOrchestrator::new(engine, settings.job),
            base_image: settings.base_image,
            keep_context: settings.keep_context,
        }
    }

    pub fn generator(&self) -> &ArtifactGenerator {
        &self.generator
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Entry-point script for `factor`.
    pub fn render(&self, factor: &FactorDefinition) -> Result<String, FactorError> {
        Ok(template::render_entry_point(factor)?)
    }

    /// Single-file script with the computation source inlined.
    pub fn render_standalone(&self, factor: &FactorDefinition) -> Result<String, FactorError> {
        Ok(template::render_standalone(factor)?)
    }

    /// Write the build context for `factor`.
    pub fn generate(&self, factor: &FactorDefinition) -> Result<BuildContext, FactorError> {
        let entry_point = self.render(factor)?;
        Ok(self.generator.generate(factor, &entry_point)?)
    }

    /// Generate a build context and build an image tagged with the folded
    /// factor name. The context is disposed afterwards unless configured to
    /// be kept.
    pub async fn build(&self, factor: &FactorDefinition) -> Result<ImageId, FactorError> {
        let context = self.generate(factor)?;
        let result = self.builder.build(&context, context.image_name()).await;

        if self.keep_context {
            info!(dir = %context.dir().display(), "Keeping build context");
        } else if let Err(e) = context.dispose() {
            // Only fatal when the build itself succeeded.
            if result.is_ok() {
                return Err(e.into());
            }
            warn!(error = %e, "Failed to dispose build context");
        }

        Ok(result?)
    }

    /// Run `factor` from an existing image.
    pub async fn run(
        &self,
        factor: &FactorDefinition,
        image: &str,
        args: ParameterArgumentVector,
        sink: Arc<dyn OutputSink>,
    ) -> Result<JobOutcome, FactorError> {
        let spec = JobSpec {
            name: factor.folded_name(),
            image: JobImage::Image(image.to_string()),
            args,
        };
        Ok(self.orchestrator.run(&spec, sink).await?)
    }

    /// Run `factor` without building an image: a standalone script is
    /// bind-mounted into the base image.
    pub async fn run_mounted(
        &self,
        factor: &FactorDefinition,
        args: ParameterArgumentVector,
        sink: Arc<dyn OutputSink>,
    ) -> Result<JobOutcome, FactorError> {
        let script = self.render_standalone(factor)?;
        let path = self.generator.write_single_file(factor, &script)?;
        let spec = JobSpec {
            name: factor.folded_name(),
            image: JobImage::Mounted {
                base_image: self.base_image.clone(),
                script: path,
            },
            args,
        };
        Ok(self.orchestrator.run(&spec, sink).await?)
    }

    /// Build `factor` and run it from the fresh image.
    pub async fn build_and_run(
        &self,
        factor: &FactorDefinition,
        args: ParameterArgumentVector,
        sink: Arc<dyn OutputSink>,
    ) -> Result<JobOutcome, FactorError> {
        let image = self.build(factor).await?;
        self.run(factor, image.as_str(), args, sink).await
    }
}
