//! CLI presentation: text and json formatters per command.

use crate::artifact::BuildContext;
use crate::builder::ImageId;
use crate::error::FactorError;
use crate::factor::FactorDefinition;
use crate::job::{JobOutcome, JobStatus};
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

fn to_json(value: &serde_json::Value) -> Result<String, FactorError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| FactorError::Config(format!("Failed to serialize output: {}", e)))
}

fn parameter_summary(factor: &FactorDefinition) -> String {
    if factor.parameters.is_empty() {
        return "-".to_string();
    }
    factor
        .parameters
        .iter()
        .map(|p| format!("{}:{}", p.name, p.type_tag))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_factor_list_text(factors: &[FactorDefinition]) -> String {
    if factors.is_empty() {
        return "No factors found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "Parameters", "Description"]);
    for factor in factors {
        table.add_row(vec![
            factor.name.clone(),
            parameter_summary(factor),
            factor.description.clone(),
        ]);
    }
    format!("{}\n\nTotal: {} factor(s)", table, factors.len())
}

pub fn format_factor_list_json(factors: &[FactorDefinition]) -> Result<String, FactorError> {
    let list: Vec<_> = factors
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "description": f.description,
                "parameters": f.parameters,
            })
        })
        .collect();
    to_json(&json!({ "factors": list, "total": factors.len() }))
}

pub fn format_factor_show_text(factor: &FactorDefinition) -> String {
    let mut output = format!("Factor: {}\n", factor.name.bold());
    if !factor.description.is_empty() {
        output.push_str(&format!("Description: {}\n", factor.description));
    }
    output.push_str(&format!("Image / container name: {}\n", factor.folded_name()));
    output.push_str("\nParameters:\n");
    if factor.parameters.is_empty() {
        output.push_str("  (none)\n");
    }
    for p in &factor.parameters {
        output.push_str(&format!("  --{:<20} {}\n", p.name, p.type_tag));
    }
    output.push_str("\nSource:\n");
    output.push_str(&factor.computation_source);
    output
}

pub fn format_factor_show_json(factor: &FactorDefinition) -> Result<String, FactorError> {
    to_json(&json!(factor))
}

pub fn format_generate_result(context: &BuildContext) -> String {
    let mut output = format!("Generated build context at {}\n", context.dir().display());
    for file in context.files() {
        output.push_str(&format!("  {}\n", file.display()));
    }
    output
}

pub fn format_build_result(factor: &FactorDefinition, image: &ImageId) -> String {
    format!("Built image {} (tag {})", image, factor.folded_name())
}

pub fn format_job_outcome_text(outcome: &JobOutcome) -> String {
    let status = match &outcome.status {
        JobStatus::Succeeded => format!("{}", "succeeded".green()),
        JobStatus::Failed { reason } => format!("{}: {}", "failed".red(), reason),
        JobStatus::TimedOut => format!("{}", "timed out".yellow()),
    };
    let elapsed = outcome.finished_at - outcome.started_at;
    let mut output = format!(
        "Job {} {} in {:.1}s (container {})",
        outcome.name,
        status,
        elapsed.num_milliseconds() as f64 / 1000.0,
        outcome.container_id
    );
    if outcome.output_truncated {
        output.push_str("\nCaptured output was truncated.");
    }
    output
}

pub fn format_job_outcome_json(outcome: &JobOutcome) -> Result<String, FactorError> {
    to_json(&json!(outcome))
}
