//! Docker Engine API client over HTTP.
//!
//! Talks to a daemon exposed on TCP (`engine.endpoint` or `DOCKER_HOST=tcp://…`).

use super::{
    BuildRequest, ByteStream, ContainerEngine, ContainerSpec, LogChunk, LogStream, OutputSource,
    PendingWait, WaitCondition, WaitResponse,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "http://localhost:2375";

// Helper function to map HTTP errors to EngineError
fn map_http_error(error: reqwest::Error) -> EngineError {
    if error.is_timeout() {
        EngineError::Transport(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        EngineError::Transport(format!("Connection error: {}", error))
    } else if error.is_decode() {
        EngineError::Decode(error.to_string())
    } else {
        EngineError::Transport(format!("HTTP error: {}", error))
    }
}

#[derive(Deserialize)]
struct DaemonMessage {
    message: String,
}

/// Turn a non-success response into an EngineError, using the daemon's
/// `{"message": ...}` body when present.
async fn status_error(response: Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<DaemonMessage>(&body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        StatusCode::NOT_FOUND => EngineError::NotFound(message),
        StatusCode::CONFLICT => EngineError::Conflict(message),
        _ => EngineError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Resolve the daemon base URL: explicit config, then `DOCKER_HOST`, then
/// the local default.
pub fn resolve_endpoint(
    configured: Option<&str>,
    docker_host: Option<&str>,
) -> Result<String, EngineError> {
    let raw = configured
        .or(docker_host)
        .unwrap_or(DEFAULT_ENDPOINT)
        .trim()
        .trim_end_matches('/');

    if let Some(rest) = raw.strip_prefix("tcp://") {
        return Ok(format!("http://{}", rest));
    }
    if raw.starts_with("unix://") || raw.starts_with("npipe://") {
        return Err(EngineError::Transport(format!(
            "Unsupported engine endpoint '{}': expose the daemon over TCP",
            raw
        )));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }
    Ok(format!("http://{}", raw))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    image: &'a str,
    cmd: &'a [String],
    tty: bool,
    host_config: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitBody {
    status_code: i64,
    #[serde(default)]
    error: Option<WaitError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitError {
    #[serde(default)]
    message: String,
}

/// Docker Engine client
pub struct DockerEngine {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl DockerEngine {
    pub fn new(
        endpoint: &str,
        api_version: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        // No overall timeout: builds, log follows and waits are long-lived.
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = if api_version.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}/{}", endpoint, api_version.trim_matches('/'))
        };

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let docker_host = std::env::var("DOCKER_HOST").ok();
        let endpoint = resolve_endpoint(config.endpoint.as_deref(), docker_host.as_deref())?;
        Self::new(
            &endpoint,
            &config.api_version,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn host_config_json(spec: &ContainerSpec) -> serde_json::Value {
    let mounts: Vec<serde_json::Value> = spec
        .host
        .mounts
        .iter()
        .map(|m| {
            json!({
                "Type": "bind",
                "Source": m.source.to_string_lossy(),
                "Target": m.target,
                "ReadOnly": m.read_only,
            })
        })
        .collect();
    json!({
        "AutoRemove": spec.host.auto_remove,
        "ExtraHosts": spec.host.extra_hosts,
        "Mounts": mounts,
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build_image(&self, request: BuildRequest) -> Result<ByteStream, EngineError> {
        let mut query: Vec<(&str, String)> = request
            .tags
            .iter()
            .map(|tag| ("t", tag.clone()))
            .collect();
        if request.suppress_output {
            query.push(("q", "1".to_string()));
        }

        debug!(tags = ?request.tags, bytes = request.context.len(), "Submitting image build");
        let response = self
            .client
            .post(self.url("/build"))
            .query(&query)
            .header("Content-Type", "application/x-tar")
            .body(request.context)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_http_error));
        Ok(Box::pin(stream))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let body = CreateBody {
            image: &spec.image,
            cmd: &spec.command,
            tty: false,
            host_config: host_config_json(spec),
        };

        let response = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", spec.name.as_str())])
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(format!("Failed to parse create response: {}", e)))?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/start", id)))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_http_error)?;

        // 304: already started
        if response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream, EngineError> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/logs", id)))
            .query(&[("follow", "true"), ("stdout", "true"), ("stderr", "true")])
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = Box::pin(response.bytes_stream());
        let state = (bytes, FrameDecoder::new(), VecDeque::new(), false);
        let stream = futures::stream::unfold(
            state,
            |(mut bytes, mut decoder, mut pending, mut done)| async move {
                loop {
                    if let Some(chunk) = pending.pop_front() {
                        return Some((Ok(chunk), (bytes, decoder, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => pending.extend(decoder.push(&data)),
                        Some(Err(e)) => {
                            done = true;
                            return Some((Err(map_http_error(e)), (bytes, decoder, pending, done)));
                        }
                        None => {
                            done = true;
                            pending.extend(decoder.finish());
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> Result<PendingWait, EngineError> {
        // The daemon flushes headers once the wait is registered; the body
        // arrives when the condition holds.
        let request = self
            .client
            .post(self.url(&format!("/containers/{}/wait", id)))
            .query(&[("condition", condition.as_str())])
            .send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| {
                EngineError::Transport(format!("Timed out registering wait on container {}", id))
            })?
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        debug!(container_id = %id, condition = condition.as_str(), "Wait registered");

        Ok(Box::pin(async move {
            let body: WaitBody = response.json().await.map_err(|e| {
                EngineError::Decode(format!("Failed to parse wait response: {}", e))
            })?;
            Ok(WaitResponse {
                status_code: body.status_code,
                error: body
                    .error
                    .map(|e| e.message)
                    .filter(|message| !message.is_empty()),
            })
        }))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/stop", id)))
            .query(&[("t", grace.as_secs().to_string())])
            .timeout(self.request_timeout + grace)
            .send()
            .await
            .map_err(map_http_error)?;

        // 304: already stopped
        if response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(self.url(&format!("/containers/{}", id)))
            .query(&[("force", force.to_string())])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_http_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    fn engine_name(&self) -> &str {
        "docker"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameMode {
    /// 8-byte header frames (container without a TTY)
    Multiplexed,
    /// Plain bytes (TTY containers)
    Raw,
}

/// Splits the engine's log stream into stdout/stderr chunks.
///
/// Multiplexed frames are `[stream, 0, 0, 0, len_be32] payload`. Streams that
/// do not start with such a header are passed through as stdout.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    mode: Option<FrameMode>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<LogChunk> {
        self.buf.extend_from_slice(data);
        self.detect_mode();

        let mut out = Vec::new();
        match self.mode {
            None => {}
            Some(FrameMode::Raw) => {
                if !self.buf.is_empty() {
                    out.push(LogChunk::stdout(std::mem::take(&mut self.buf)));
                }
            }
            Some(FrameMode::Multiplexed) => {
                while self.buf.len() >= 8 {
                    let len =
                        u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                            as usize;
                    if self.buf.len() < 8 + len {
                        break;
                    }
                    let source = if self.buf[0] == 2 {
                        OutputSource::Stderr
                    } else {
                        OutputSource::Stdout
                    };
                    let payload = self.buf[8..8 + len].to_vec();
                    self.buf.drain(..8 + len);
                    if !payload.is_empty() {
                        out.push(LogChunk {
                            source,
                            bytes: payload,
                        });
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<LogChunk> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let payload = match self.mode {
            Some(FrameMode::Multiplexed) if rest.len() > 8 => rest[8..].to_vec(),
            Some(FrameMode::Multiplexed) => return None,
            _ => rest,
        };
        Some(LogChunk::stdout(payload))
    }

    fn detect_mode(&mut self) {
        if self.mode.is_some() {
            return;
        }
        match self.buf.first() {
            None => {}
            Some(first) if *first > 2 => self.mode = Some(FrameMode::Raw),
            Some(_) if self.buf.len() >= 4 => {
                self.mode = Some(if self.buf[1..4] == [0, 0, 0] {
                    FrameMode::Multiplexed
                } else {
                    FrameMode::Raw
                });
            }
            Some(_) => {}
        }
    }
}
