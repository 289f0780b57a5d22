//! CLI route: single route table and run context. Dispatches to the pipeline and presentation.

use crate::artifact::ArtifactGenerator;
use crate::catalog::FactorCatalog;
use crate::config::{ConfigLoader, FactorboxConfig};
use crate::engine::{self, ContainerEngine};
use crate::error::FactorError;
use crate::factor::{FactorDefinition, ParameterArgumentVector};
use crate::job::{self, OutputSink, StdioSink};
use crate::pipeline::{FactorPipeline, PipelineSettings};
use crate::template;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cli::command_name;
use crate::cli::parse::{Commands, FactorCommands};
use crate::cli::presentation::{
    format_build_result, format_factor_list_json, format_factor_list_text,
    format_factor_show_json, format_factor_show_text, format_generate_result,
    format_job_outcome_json, format_job_outcome_text,
};

/// Runtime context for CLI execution: workspace, merged config and catalog.
/// The engine connection is opened lazily by commands that need it.
pub struct RunContext {
    workspace_root: PathBuf,
    config: FactorboxConfig,
    catalog: FactorCatalog,
    engine: Option<Arc<dyn ContainerEngine>>,
    sink: Arc<dyn OutputSink>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, FactorError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Self::from_config(workspace_root, config)
    }

    /// Create run context from an already merged configuration.
    pub fn from_config(workspace_root: PathBuf, config: FactorboxConfig) -> Result<Self, FactorError> {
        config.ensure_valid()?;
        let catalog = FactorCatalog::with_workspace(&config.catalog.factors_dir_in(&workspace_root))?;
        debug!(
            workspace = %workspace_root.display(),
            factors = catalog.len(),
            "Run context ready"
        );
        Ok(Self {
            workspace_root,
            config,
            catalog,
            engine: None,
            sink: Arc::new(StdioSink),
        })
    }

    /// Use `engine` instead of connecting from configuration.
    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Send live job output to `sink` instead of the process streams.
    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &FactorboxConfig {
        &self.config
    }

    pub fn catalog(&self) -> &FactorCatalog {
        &self.catalog
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, FactorError> {
        info!(command = %command_name(command), "Executing command");
        match command {
            Commands::Factors { command } => self.handle_factor_command(command),
            Commands::Render { factor, standalone } => {
                let factor = self.catalog.get_or_error(factor)?;
                if *standalone {
                    Ok(template::render_standalone(factor)?)
                } else {
                    Ok(template::render_entry_point(factor)?)
                }
            }
            Commands::Generate { factor, out } => {
                let factor = self.catalog.get_or_error(factor)?;
                let root = out
                    .clone()
                    .unwrap_or_else(|| self.config.build.work_dir_in(&self.workspace_root));
                let entry_point = template::render_entry_point(factor)?;
                let context = ArtifactGenerator::new(root, self.config.build.base_image.clone())
                    .generate(factor, &entry_point)?;
                Ok(format_generate_result(&context))
            }
            Commands::Build { factor } => {
                let factor = self.catalog.get_or_error(factor)?;
                let pipeline = self.pipeline()?;
                let image = block_on(pipeline.build(factor))??;
                Ok(format_build_result(factor, &image))
            }
            Commands::Run {
                factor,
                image,
                mount,
                build,
                format,
                args,
            } => {
                let factor = self.catalog.get_or_error(factor)?;
                let args = ParameterArgumentVector::from_tokens(args)?;
                self.run_factor(factor, image.as_deref(), *mount, *build, format, args)
            }
        }
    }

    fn handle_factor_command(&self, command: &FactorCommands) -> Result<String, FactorError> {
        match command {
            FactorCommands::List { format } => {
                if format == "json" {
                    format_factor_list_json(self.catalog.list())
                } else {
                    Ok(format_factor_list_text(self.catalog.list()))
                }
            }
            FactorCommands::Show { name, format } => {
                let factor = self.catalog.get_or_error(name)?;
                if format == "json" {
                    format_factor_show_json(factor)
                } else {
                    Ok(format_factor_show_text(factor))
                }
            }
        }
    }

    fn run_factor(
        &self,
        factor: &FactorDefinition,
        image: Option<&str>,
        mount: bool,
        build: bool,
        format: &str,
        args: ParameterArgumentVector,
    ) -> Result<String, FactorError> {
        let pipeline = self.pipeline()?;
        let sink = Arc::clone(&self.sink);
        let outcome = if mount {
            block_on(pipeline.run_mounted(factor, args, sink))??
        } else if build {
            block_on(pipeline.build_and_run(factor, args, sink))??
        } else {
            let default_image = factor.folded_name();
            let image = image.unwrap_or(&default_image);
            block_on(pipeline.run(factor, image, args, sink))??
        };

        let rendered = if format == "json" {
            format_job_outcome_json(&outcome)?
        } else {
            format_job_outcome_text(&outcome)
        };
        if outcome.is_success() {
            Ok(rendered)
        } else {
            // Summary goes to the log; the error carries the exit status.
            info!(summary = %rendered, "Job did not succeed");
            outcome.into_result().map(|_| rendered)
        }
    }

    fn pipeline(&self) -> Result<FactorPipeline, FactorError> {
        let engine = match &self.engine {
            Some(engine) => Arc::clone(engine),
            None => engine::connect(&self.config.engine)?,
        };
        Ok(FactorPipeline::new(
            engine,
            PipelineSettings::from_config(&self.config, &self.workspace_root),
        ))
    }
}

/// Time cancelled jobs get to remove their containers after Ctrl-C.
const INTERRUPT_CLEANUP_GRACE: Duration = Duration::from_secs(10);

/// Drive `future` to completion on a fresh runtime, abandoning it on Ctrl-C.
fn block_on<F: Future>(future: F) -> Result<F::Output, FactorError> {
    block_on_until(future, async {
        // Without a signal handler there is nothing to wait for.
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    })
}

/// Drive `future` on a fresh runtime unless `interrupt` resolves first. An
/// interrupted future is dropped, which cancels any job it drives, and the
/// removals that cancellation schedules run before the runtime shuts down.
fn block_on_until<F, I>(future: F, interrupt: I) -> Result<F::Output, FactorError>
where
    F: Future,
    I: Future<Output = ()>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| FactorError::Config(format!("Failed to create runtime: {}", e)))?;
    rt.block_on(async move {
        let mut future = Box::pin(future);
        tokio::select! {
            output = &mut future => return Ok(output),
            _ = interrupt => {}
        }

        warn!("Interrupted, cancelling");
        drop(future);
        if !job::await_cancelled_removals(INTERRUPT_CLEANUP_GRACE).await {
            warn!("Cancelled containers were not confirmed removed");
        }
        Err(FactorError::Interrupted)
    })
}
