//! Factor catalog
//!
//! Built-in factor definitions are embedded in the binary at compile time and
//! loaded once into a process-wide catalog. Workspaces can add or override
//! factors with `*.toml` manifests that point at a computation source file.

use crate::error::FactorError;
use crate::factor::{FactorDefinition, ParameterSpec};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Built-in factor data
struct BuiltinFactor {
    name: &'static str,
    description: &'static str,
    parameters: &'static [(&'static str, &'static str)],
    source: &'static str,
}

const BUILTIN_FACTORS: &[BuiltinFactor] = &[
    BuiltinFactor {
        name: "POC",
        description: "Price Open Close",
        parameters: &[("interval", "str")],
        source: include_str!("../factors/POC.py"),
    },
    BuiltinFactor {
        name: "MACD",
        description: "MACD",
        parameters: &[
            ("interval", "str"),
            ("fast", "int"),
            ("slow", "int"),
            ("dea", "int"),
        ],
        source: include_str!("../factors/MACD.py"),
    },
];

static BUILTIN_CATALOG: Lazy<FactorCatalog> = Lazy::new(|| {
    let factors = BUILTIN_FACTORS
        .iter()
        .map(|f| {
            FactorDefinition::new(
                f.name,
                f.description,
                f.parameters
                    .iter()
                    .map(|(name, tag)| ParameterSpec::new(*name, *tag))
                    .collect(),
                f.source,
            )
        })
        .collect();
    FactorCatalog { factors }
});

/// On-disk factor manifest
#[derive(Debug, Deserialize)]
struct FactorManifest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    /// Computation source, relative to the manifest's directory
    source: PathBuf,
}

/// Ordered, read-only registry of factor definitions.
#[derive(Debug, Clone, Default)]
pub struct FactorCatalog {
    factors: Vec<FactorDefinition>,
}

impl FactorCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> &'static FactorCatalog {
        &BUILTIN_CATALOG
    }

    /// Built-ins overlaid with the manifests found in `factors_dir`.
    pub fn with_workspace(factors_dir: &Path) -> Result<Self, FactorError> {
        let mut catalog = Self::builtin().clone();
        for factor in Self::load_dir(factors_dir)?.factors {
            catalog.insert(factor);
        }
        Ok(catalog)
    }

    /// Load every `*.toml` manifest in `dir`, in file name order.
    /// A missing directory yields an empty catalog.
    pub fn load_dir(dir: &Path) -> Result<Self, FactorError> {
        let mut catalog = Self::default();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No factor manifest directory");
            return Ok(catalog);
        }

        let mut manifests = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().map(|ext| ext == "toml").unwrap_or(false)
            {
                manifests.push(path.to_path_buf());
            }
        }

        for path in manifests {
            let factor = Self::load_manifest(&path)?;
            debug!(factor = %factor.name, manifest = %path.display(), "Loaded factor manifest");
            catalog.insert(factor);
        }
        Ok(catalog)
    }

    fn load_manifest(path: &Path) -> Result<FactorDefinition, FactorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FactorError::Config(format!("Failed to read factor manifest {}: {}", path.display(), e))
        })?;
        let manifest: FactorManifest = toml::from_str(&content).map_err(|e| {
            FactorError::Config(format!("Invalid factor manifest {}: {}", path.display(), e))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let source_path = base.join(&manifest.source);
        let computation_source = std::fs::read_to_string(&source_path).map_err(|e| {
            FactorError::Config(format!(
                "Failed to read source {} for factor '{}': {}",
                source_path.display(),
                manifest.name,
                e
            ))
        })?;

        Ok(FactorDefinition::new(
            manifest.name,
            manifest.description,
            manifest.parameters,
            computation_source,
        ))
    }

    /// Add a definition, replacing any existing one with the same folded name.
    pub fn insert(&mut self, factor: FactorDefinition) {
        if let Some(existing) = self
            .factors
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(&factor.name))
        {
            warn!(factor = %factor.name, "Overriding factor definition");
            *existing = factor;
        } else {
            self.factors.push(factor);
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&FactorDefinition> {
        self.factors.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn get_or_error(&self, name: &str) -> Result<&FactorDefinition, FactorError> {
        self.get(name)
            .ok_or_else(|| FactorError::UnknownFactor(name.to_string()))
    }

    pub fn list(&self) -> &[FactorDefinition] {
        &self.factors
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}
