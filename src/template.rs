//! Entry-point rendering.
//!
//! Turns a [`FactorDefinition`] into the text of the Python script that parses
//! the job's command line, fetches input rows, calls the factor and stores its
//! result. Rendering is a pure function of the definition.

use crate::error::TemplateError;
use crate::factor::{FactorDefinition, ParamKind, FIXED_FLAGS};
use std::collections::HashSet;

/// Script extension of every generated file.
pub const SCRIPT_EXTENSION: &str = "py";

/// Separator between task identifier and factor name in the output collection.
pub const OUTPUT_SEPARATOR: &str = ".";

/// Sentinel default for `--end`; any `start >= end` range disables filtering.
pub const UNBOUNDED_END: i64 = -1;

const ENTRY_POINT_TEMPLATE: &str = r#"import argparse

import pandas as pd
from pymongo import MongoClient
{{factor_import}}
parser = argparse.ArgumentParser(description={{description}})
{{parameter_flags}}parser.add_argument("--task_id")
parser.add_argument("--host")
parser.add_argument("--port", type=int)
parser.add_argument("--database")
parser.add_argument("--collection")
parser.add_argument("--start", type=int, default=0)
parser.add_argument("--end", type=int, default={{unbounded_end}})

args = parser.parse_args()

mongo_client = MongoClient(host=args.host, port=args.port)


# Rows with start <= ts < end. A range with start >= end (including the
# default end of {{unbounded_end}}) fetches the whole collection.
def get_data(database, collection, start, end):
    coll = mongo_client[database][collection]
    query = {}
    if start < end:
        query = {"ts": {"$gte": start, "$lt": end}}
    return coll.find(query)


def handle_result(result, database, collection):
    if not isinstance(result, pd.DataFrame):
        raise TypeError("{{factor_name}} must return a pandas.DataFrame, got %s" % type(result).__name__)
    coll = mongo_client[database][collection]
    coll.insert_many(result.to_dict("records"))


data = get_data(args.database, args.collection, args.start, args.end)
result = {{factor_name}}({{factor_call_args}})

output_collection = "{{separator}}".join([args.task_id, "{{factor_name}}"])
handle_result(result, args.database, output_collection)

mongo_client.close()
"#;

/// A definition that passed static validation, with resolved parameter types.
#[derive(Debug, Clone)]
pub struct ValidatedFactor<'a> {
    pub definition: &'a FactorDefinition,
    pub parameters: Vec<(&'a str, ParamKind)>,
}

/// Check the definition's name and parameter schema.
pub fn validate(definition: &FactorDefinition) -> Result<ValidatedFactor<'_>, TemplateError> {
    if definition.name.is_empty() {
        return Err(TemplateError::EmptyFactorName);
    }
    if !is_identifier(&definition.name) {
        return Err(TemplateError::InvalidFactorName(definition.name.clone()));
    }

    let mut seen = HashSet::new();
    let mut parameters = Vec::with_capacity(definition.parameters.len());
    for param in &definition.parameters {
        if !is_identifier(&param.name) {
            return Err(TemplateError::InvalidParameterName {
                factor: definition.name.clone(),
                name: param.name.clone(),
            });
        }
        if FIXED_FLAGS.contains(&param.name.as_str()) {
            return Err(TemplateError::ReservedParameterName {
                factor: definition.name.clone(),
                name: param.name.clone(),
            });
        }
        if !seen.insert(param.name.as_str()) {
            return Err(TemplateError::DuplicateParameter {
                factor: definition.name.clone(),
                name: param.name.clone(),
            });
        }
        let kind = ParamKind::from_tag(&param.type_tag).ok_or_else(|| {
            TemplateError::UnknownParameterType {
                factor: definition.name.clone(),
                name: param.name.clone(),
                type_tag: param.type_tag.clone(),
            }
        })?;
        parameters.push((param.name.as_str(), kind));
    }

    Ok(ValidatedFactor {
        definition,
        parameters,
    })
}

/// Render the entry point of a build context. The computation is imported
/// from the sibling `<FactorName>.py` module.
pub fn render_entry_point(definition: &FactorDefinition) -> Result<String, TemplateError> {
    let validated = validate(definition)?;
    let factor_import = format!(
        "\nfrom {name} import {name}\n",
        name = definition.name
    );
    Ok(render(&validated, &factor_import))
}

/// Render a single-file script with the computation source inlined ahead of
/// the entry point, for running against a stock base image.
pub fn render_standalone(definition: &FactorDefinition) -> Result<String, TemplateError> {
    let validated = validate(definition)?;
    let mut source = definition.computation_source.trim_end().to_string();
    source.push_str("\n\n");
    Ok(format!("{}{}", source, render(&validated, "")))
}

fn render(validated: &ValidatedFactor<'_>, factor_import: &str) -> String {
    let name = validated.definition.name.as_str();

    let mut parameter_flags = String::new();
    for (param, kind) in &validated.parameters {
        parameter_flags.push_str(&format!(
            "parser.add_argument(\"--{}\", type={})\n",
            param,
            kind.python_type()
        ));
    }

    let mut call_args = vec!["data".to_string()];
    call_args.extend(
        validated
            .parameters
            .iter()
            .map(|(param, _)| format!("{}=args.{}", param, param)),
    );

    let description = python_string_literal(&validated.definition.description);
    let unbounded_end = UNBOUNDED_END.to_string();
    let call_args = call_args.join(", ");

    substitute(
        ENTRY_POINT_TEMPLATE,
        &[
            ("factor_import", factor_import),
            ("description", &description),
            ("parameter_flags", &parameter_flags),
            ("unbounded_end", &unbounded_end),
            ("factor_name", name),
            ("factor_call_args", &call_args),
            ("separator", OUTPUT_SEPARATOR),
        ],
    )
}

/// Single-pass `{{key}}` substitution; inserted values are never rescanned.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = &after[..close];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Double-quoted Python string literal.
fn python_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
