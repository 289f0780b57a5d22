//! Image building
//!
//! Packs a build context into a tar archive, submits it to the engine and
//! extracts the image ID from the JSON-lines build response. Builds are not
//! retried.

use crate::artifact::BuildContext;
use crate::engine::{BuildRequest, ContainerEngine};
use crate::error::BuildError;
use futures::StreamExt;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Opaque image identifier reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pack a directory into a tar archive, entries relative to the directory
/// root in file name order with normalized headers.
pub fn pack_context(dir: &Path) -> Result<Vec<u8>, BuildError> {
    let archive_err = |source| BuildError::Archive {
        dir: dir.to_path_buf(),
        source,
    };

    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_err(std::io::Error::from(e)))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| archive_err(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, entry.path())
                .map_err(archive_err)?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(entry.path(), relative)
                .map_err(archive_err)?;
        }
    }

    builder.into_inner().map_err(archive_err)
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// One line of the engine's build response
#[derive(Debug, Deserialize)]
struct BuildMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

/// Extract the image ID from a complete build response body.
///
/// Any line reporting an error fails the build. The ID comes from the
/// `stream` field of the last non-empty line: the text after its last `:`
/// (for `sha256:<hex>`) and then its last word (for `Successfully built <hex>`).
pub fn parse_build_response(tag: &str, body: &[u8]) -> Result<ImageId, BuildError> {
    let text = String::from_utf8_lossy(body);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    for line in &lines {
        if let Ok(message) = serde_json::from_str::<BuildMessage>(line) {
            let failure = message
                .error
                .filter(|e| !e.is_empty())
                .or_else(|| message.error_detail.map(|d| d.message).filter(|m| !m.is_empty()));
            if let Some(failure) = failure {
                return Err(BuildError::Failed {
                    tag: tag.to_string(),
                    message: failure,
                });
            }
        }
    }

    let last = lines.last().ok_or_else(|| BuildError::EmptyResponse {
        tag: tag.to_string(),
    })?;
    let message: BuildMessage =
        serde_json::from_str(last).map_err(|e| BuildError::UnparsableResponse {
            tag: tag.to_string(),
            line: last.to_string(),
            message: e.to_string(),
        })?;

    let stream = message.stream.ok_or_else(|| BuildError::MissingImageId {
        tag: tag.to_string(),
    })?;
    let trimmed = stream.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let after_colon = trimmed.rsplit(':').next().unwrap_or(trimmed);
    let id = after_colon.split_whitespace().last().unwrap_or("");

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BuildError::MissingImageId {
            tag: tag.to_string(),
        });
    }
    Ok(ImageId::new(id))
}

/// Submits build contexts to the shared engine
#[derive(Clone)]
pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Build `context` and tag the result `image_name`.
    pub async fn build(
        &self,
        context: &BuildContext,
        image_name: &str,
    ) -> Result<ImageId, BuildError> {
        let archive = pack_context(context.dir())?;
        debug!(
            dir = %context.dir().display(),
            tag = image_name,
            bytes = archive.len(),
            "Packed build context"
        );

        let engine_err = |source| BuildError::Engine {
            tag: image_name.to_string(),
            source,
        };
        let mut stream = self
            .engine
            .build_image(BuildRequest {
                context: archive,
                tags: vec![image_name.to_string()],
                suppress_output: true,
            })
            .await
            .map_err(engine_err)?;

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.map_err(engine_err)?);
        }

        match parse_build_response(image_name, &body) {
            Ok(id) => {
                info!(tag = image_name, image_id = %id, engine = self.engine.engine_name(), "Image built");
                Ok(id)
            }
            Err(e) => {
                warn!(tag = image_name, error = %e, "Image build failed");
                Err(e)
            }
        }
    }
}
