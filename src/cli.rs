//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; a single route table dispatches to the pipeline.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::{exit_code, map_error};
pub use parse::{Cli, Commands, FactorCommands};
pub use presentation::{
    format_build_result, format_factor_list_json, format_factor_list_text,
    format_factor_show_json, format_factor_show_text, format_generate_result,
    format_job_outcome_json, format_job_outcome_text,
};
pub use route::RunContext;
