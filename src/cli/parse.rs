//! CLI parse: clap types for factorbox. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// factorbox - generate, build and run data factors as container jobs
#[derive(Parser, Debug)]
#[command(name = "factorbox")]
#[command(about = "Generate, build and run parameterized data factors as time-bounded container jobs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect the factor catalog
    Factors {
        #[command(subcommand)]
        command: FactorCommands,
    },
    /// Print the generated entry-point script
    Render {
        /// Factor name (case-insensitive)
        factor: String,
        /// Inline the computation source into a single script
        #[arg(long)]
        standalone: bool,
    },
    /// Write a build context without building it
    Generate {
        factor: String,
        /// Root directory for the context (default: build.work_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build a factor image
    Build { factor: String },
    /// Run a factor as a container job
    Run {
        factor: String,
        /// Image to run (default: the image tagged with the factor name)
        #[arg(long, conflicts_with_all = ["mount", "build"])]
        image: Option<String>,
        /// Bind-mount a standalone script into the base image instead of building
        #[arg(long, conflicts_with = "build")]
        mount: bool,
        /// Build the image first, then run it
        #[arg(long)]
        build: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Arguments forwarded to the factor, e.g. -- --task_id t1 --interval 1min
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FactorCommands {
    /// List available factors
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show one factor's definition
    Show {
        name: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}
