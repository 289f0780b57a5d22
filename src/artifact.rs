//! Build context generation
//!
//! Materializes a factor as a directory the container engine can build:
//! entry point, computation source, dependency manifest and build file.
//! A directory is either complete or absent; partial writes are rolled back.

use crate::error::{ArtifactFile, FilesystemError};
use crate::factor::FactorDefinition;
use crate::template::SCRIPT_EXTENSION;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Runtime dependencies installed into every factor image.
pub const DEPENDENCIES: &[&str] = &["pymongo", "pandas"];

/// Base runtime image used when none is configured.
pub const DEFAULT_BASE_IMAGE: &str = "python:3.10";

/// File names inside a build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub entry_point: String,
    pub dependency_manifest: String,
    pub build_file: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            entry_point: format!("main.{}", SCRIPT_EXTENSION),
            dependency_manifest: "requirements.txt".to_string(),
            build_file: "Dockerfile".to_string(),
        }
    }
}

/// Dependency manifest contents.
pub fn render_dependency_manifest() -> String {
    let mut manifest = DEPENDENCIES.join("\n");
    manifest.push('\n');
    manifest
}

/// Build file contents for the given base image.
pub fn render_build_file(base_image: &str, dependency_manifest: &str) -> String {
    format!(
        "FROM {base_image}\n\nWORKDIR /app\nCOPY . .\n\nRUN pip install -r {dependency_manifest} --no-cache-dir\n"
    )
}

/// A generated, fully flushed build context directory.
///
/// The directory is disposable once an image has been built from it.
#[derive(Debug)]
pub struct BuildContext {
    dir: PathBuf,
    image_name: String,
    files: Vec<PathBuf>,
}

impl BuildContext {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Case-folded factor name, used as image tag.
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Delete the directory.
    pub fn dispose(self) -> Result<(), FilesystemError> {
        std::fs::remove_dir_all(&self.dir).map_err(|source| FilesystemError::Remove {
            path: self.dir.clone(),
            source,
        })?;
        debug!(dir = %self.dir.display(), "Disposed build context");
        Ok(())
    }
}

/// Writes build contexts under a root directory, one directory per factor.
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    root: PathBuf,
    base_image: String,
    layout: ArtifactLayout,
}

impl ArtifactGenerator {
    pub fn new(root: impl Into<PathBuf>, base_image: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_image: base_image.into(),
            layout: ArtifactLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Directory a factor's build context is written to.
    pub fn context_dir(&self, factor: &FactorDefinition) -> PathBuf {
        self.root.join(factor.folded_name())
    }

    /// Write the four build context files for `factor`.
    ///
    /// Fails with [`FilesystemError::DirectoryExists`] if the factor's
    /// directory is already present. Concurrent calls for the same factor are
    /// serialized only by that check: exactly one wins.
    pub fn generate(
        &self,
        factor: &FactorDefinition,
        entry_point: &str,
    ) -> Result<BuildContext, FilesystemError> {
        std::fs::create_dir_all(&self.root).map_err(|source| FilesystemError::CreateDirectory {
            path: self.root.clone(),
            source,
        })?;

        let dir = self.context_dir(factor);
        if let Err(source) = std::fs::create_dir(&dir) {
            return Err(if source.kind() == std::io::ErrorKind::AlreadyExists {
                FilesystemError::DirectoryExists(dir)
            } else {
                FilesystemError::CreateDirectory { path: dir, source }
            });
        }

        let manifest = render_dependency_manifest();
        let build_file = render_build_file(&self.base_image, &self.layout.dependency_manifest);
        let source_file = format!("{}.{}", factor.name, SCRIPT_EXTENSION);
        let files: [(ArtifactFile, &str, &str); 4] = [
            (ArtifactFile::EntryPoint, &self.layout.entry_point, entry_point),
            (
                ArtifactFile::ComputationSource,
                &source_file,
                &factor.computation_source,
            ),
            (
                ArtifactFile::DependencyManifest,
                &self.layout.dependency_manifest,
                &manifest,
            ),
            (ArtifactFile::BuildFile, &self.layout.build_file, &build_file),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (kind, name, content) in files {
            let path = dir.join(name);
            if let Err(source) = write_new_file(&path, content) {
                rollback(&dir);
                return Err(FilesystemError::WriteFile {
                    file: kind,
                    path,
                    source,
                });
            }
            written.push(path);
        }

        info!(
            factor = %factor.name,
            dir = %dir.display(),
            "Generated build context"
        );
        Ok(BuildContext {
            dir,
            image_name: factor.folded_name(),
            files: written,
        })
    }

    /// Write a standalone script for bind-mount runs and return its absolute
    /// path. Replaces any previous script for the same factor.
    pub fn write_single_file(
        &self,
        factor: &FactorDefinition,
        script: &str,
    ) -> Result<PathBuf, FilesystemError> {
        std::fs::create_dir_all(&self.root).map_err(|source| FilesystemError::CreateDirectory {
            path: self.root.clone(),
            source,
        })?;

        let path = self
            .root
            .join(format!("{}-standalone.{}", factor.folded_name(), SCRIPT_EXTENSION));
        let staging = path.with_extension(format!("{}.tmp", SCRIPT_EXTENSION));
        let write_err = |source| FilesystemError::WriteFile {
            file: ArtifactFile::EntryPoint,
            path: path.clone(),
            source,
        };

        let _ = std::fs::remove_file(&staging);
        if let Err(e) = write_new_file(&staging, script) {
            let _ = std::fs::remove_file(&staging);
            return Err(write_err(e));
        }
        std::fs::rename(&staging, &path).map_err(write_err)?;

        let absolute = dunce::canonicalize(&path).map_err(write_err)?;
        debug!(factor = %factor.name, path = %absolute.display(), "Wrote standalone script");
        Ok(absolute)
    }
}

fn write_new_file(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

fn rollback(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Failed to roll back partial build context");
    }
}
