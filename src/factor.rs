//! Factor definitions and job argument vectors.

use crate::error::FactorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flags every generated entry point declares regardless of the factor.
pub const FIXED_FLAGS: &[&str] = &[
    "task_id",
    "host",
    "port",
    "database",
    "collection",
    "start",
    "end",
];

/// Primitive parameter types understood by the generated entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Float,
}

impl ParamKind {
    /// Resolve a declared type tag. Accepts the short spellings used by
    /// factor authors (`str`, `int`) alongside the long ones.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "str" | "string" => Some(ParamKind::String),
            "int" | "integer" => Some(ParamKind::Integer),
            "float" => Some(ParamKind::Float),
            _ => None,
        }
    }

    /// Parsing type name in the generated script.
    pub fn python_type(&self) -> &'static str {
        match self {
            ParamKind::String => "str",
            ParamKind::Integer => "int",
            ParamKind::Float => "float",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
        };
        f.write_str(name)
    }
}

/// One declared factor parameter, with its type tag as written by the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// A named, parameterized computation.
///
/// `computation_source` is never parsed; it is copied verbatim into the
/// generated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub computation_source: String,
}

impl FactorDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterSpec>,
        computation_source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            computation_source: computation_source.into(),
        }
    }

    /// Case-folded name used for the build directory, image tag and container name.
    pub fn folded_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Ordered `--flag value` pairs handed to the job as process arguments.
///
/// The orchestrator forwards these verbatim and never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterArgumentVector {
    pairs: Vec<(String, String)>,
}

impl ParameterArgumentVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flag/value pair. A leading `--` on the flag is optional.
    pub fn flag(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(flag, value);
        self
    }

    pub fn push(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        let flag = flag.into();
        let flag = flag.strip_prefix("--").unwrap_or(&flag).to_string();
        self.pairs.push((flag, value.into()));
    }

    /// Pair up raw command-line tokens (`--flag value --flag value ...`).
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, FactorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.len() % 2 != 0 {
            return Err(FactorError::InvalidArguments(format!(
                "expected flag/value pairs, got {} tokens",
                tokens.len()
            )));
        }

        let mut args = Self::new();
        for pair in tokens.chunks(2) {
            let flag = &pair[0];
            if !flag.starts_with("--") || flag.len() <= 2 {
                return Err(FactorError::InvalidArguments(format!(
                    "expected a --flag, got '{}'",
                    flag
                )));
            }
            args.push(flag.as_str(), pair[1].clone());
        }
        Ok(args)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Value of the first occurrence of `flag`.
    pub fn get(&self, flag: &str) -> Option<&str> {
        let flag = flag.strip_prefix("--").unwrap_or(flag);
        self.pairs
            .iter()
            .find(|(name, _)| name == flag)
            .map(|(_, value)| value.as_str())
    }

    /// Flatten into process arguments.
    pub fn to_args(&self) -> Vec<String> {
        self.pairs
            .iter()
            .flat_map(|(flag, value)| [format!("--{}", flag), value.clone()])
            .collect()
    }
}
