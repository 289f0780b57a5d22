//! CLI command-name contract used in logs.

use crate::cli::parse::{Commands, FactorCommands};

/// Command name for log fields (e.g. "factors.list", "run").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Factors { command } => format!("factors.{}", factor_command_name(command)),
        Commands::Render { .. } => "render".to_string(),
        Commands::Generate { .. } => "generate".to_string(),
        Commands::Build { .. } => "build".to_string(),
        Commands::Run { .. } => "run".to_string(),
    }
}

pub fn factor_command_name(command: &FactorCommands) -> &'static str {
    match command {
        FactorCommands::List { .. } => "list",
        FactorCommands::Show { .. } => "show",
    }
}
