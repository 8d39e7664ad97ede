//! Build orchestration: one container-based buildpack build per call.
//!
//! The engine validates the request, makes sure the builder image is
//! present (pulling it if not), runs the builder in a container with the
//! source directory and the container-control socket mounted, streams its
//! log output through the demultiplexer on a separate task while waiting
//! for exit, and removes the container no matter how the attempt ended.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::config::BuildSettings;
use crate::demux::{DemuxError, LogDemuxer};
use crate::errors::{BuildError, RuntimeError};
use crate::events::{Event, EventBus};
use crate::runtime::{ContainerRuntime, ContainerSpec};

/// Target platform for the produced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Arm64,
    Amd64,
}

impl Platform {
    /// The platform string handed to the builder.
    pub fn docker_platform(&self) -> &'static str {
        match self {
            Platform::Arm64 => "linux/arm64",
            Platform::Amd64 => "linux/amd64",
        }
    }
}

impl FromStr for Platform {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm64" => Ok(Platform::Arm64),
            "amd64" => Ok(Platform::Amd64),
            other => Err(BuildError::InvalidPlatform {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Arm64 => write!(f, "arm64"),
            Platform::Amd64 => write!(f, "amd64"),
        }
    }
}

/// One validated-on-use build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source_dir: PathBuf,
    pub platform: Platform,
}

impl BuildRequest {
    pub fn new(source_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            source_dir: source_dir.into(),
            platform,
        }
    }
}

pub struct BuildEngine {
    runtime: Arc<dyn ContainerRuntime>,
    events: EventBus,
    settings: BuildSettings,
}

impl BuildEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, events: EventBus, settings: BuildSettings) -> Self {
        Self {
            runtime,
            events,
            settings,
        }
    }

    /// Run one build. Returns when the container has exited and the log
    /// stream has drained, or when `cancel` fires (which stops log
    /// forwarding but still runs the wait/remove cleanup sequence).
    pub async fn build(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        let source = self.validate_source(&request.source_dir)?;
        self.ensure_builder_image().await?;

        let spec = self.container_spec(&source, request.platform);
        tracing::debug!(image = %spec.image, cmd = ?spec.cmd, "creating build container");
        let id = self.runtime.create_container(&spec).await?;

        let result = self.run_to_completion(&id, cancel).await;

        // Cleanup must not mask the build outcome.
        if let Err(e) = self.runtime.remove_container(&id).await {
            tracing::warn!(container = %id, error = %e, "failed to remove build container");
        }
        result?;

        self.emit_success_summary();
        Ok(())
    }

    fn validate_source(&self, dir: &Path) -> Result<PathBuf, BuildError> {
        if !dir.is_dir() {
            return Err(BuildError::SourceMissing {
                path: dir.to_path_buf(),
            });
        }
        dir.canonicalize().map_err(|_| BuildError::SourceMissing {
            path: dir.to_path_buf(),
        })
    }

    /// Pull the builder image if it is not already present, forwarding
    /// every pull progress record as a log event. A pull that "succeeds"
    /// without leaving the image behind is reported as fatal.
    async fn ensure_builder_image(&self) -> Result<(), BuildError> {
        let image = &self.settings.builder_image;
        if self.runtime.inspect_image(image).await? {
            return Ok(());
        }

        self.emit_log("Pulling builder image...");
        let mut progress = self.runtime.pull_image(image);
        while let Some(record) = progress.next().await {
            let record = record?;
            if let Some(status) = record.status {
                self.emit_log(&status);
            }
        }

        if !self.runtime.inspect_image(image).await? {
            return Err(BuildError::ImageMissingAfterPull {
                image: image.clone(),
            });
        }
        Ok(())
    }

    fn container_spec(&self, source: &Path, platform: Platform) -> ContainerSpec {
        let socket = &self.settings.docker_socket;
        ContainerSpec {
            image: self.settings.builder_image.clone(),
            cmd: vec![
                "build".to_string(),
                self.settings.app_image.clone(),
                "--path".to_string(),
                self.settings.workspace_dir.clone(),
                "--builder".to_string(),
                self.settings.builder_name.clone(),
                "--creation-time".to_string(),
                "now".to_string(),
                "--platform".to_string(),
                platform.docker_platform().to_string(),
            ],
            binds: vec![
                format!("{}:{}", source.display(), self.settings.workspace_dir),
                // The builder launches nested containers, so it needs the
                // host control socket at the same path.
                format!("{socket}:{socket}"),
            ],
            // Root so the socket is accessible inside the container.
            user: "root".to_string(),
            security_opt: vec!["label:disable".to_string()],
        }
    }

    /// Start the container, pump its logs on a separate task, and wait for
    /// exit; the two run concurrently since the container may produce
    /// unbounded output while running. Returns once the container has a
    /// terminal status and the log task has drained or `cancel` fired.
    async fn run_to_completion(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        self.runtime.start_container(id).await?;

        let logs = self.runtime.stream_logs(id);
        let mut pump = tokio::spawn(pump_logs(logs, self.events.clone(), cancel.child_token()));

        let outcome = match self.runtime.wait_container(id).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(BuildError::ExitStatus { code }),
            Err(e) => Err(BuildError::Wait(e)),
        };

        // Let the stream drain so a fast-failing container doesn't lose
        // its tail of output.
        let stream_outcome = tokio::select! {
            res = &mut pump => res.unwrap_or(Ok(())),
            _ = cancel.cancelled() => {
                pump.abort();
                Ok(())
            }
        };

        outcome?;
        stream_outcome?;
        Ok(())
    }

    fn emit_log(&self, line: &str) {
        self.events.emit(Event::BuildLog {
            line: line.to_string(),
        });
    }

    fn emit_success_summary(&self) {
        let image = &self.settings.app_image;
        let port = self.settings.app_port;
        self.emit_log("\x1b[1;32m✓ Build completed successfully!\x1b[0m");
        self.emit_log("To run the application, use:");
        self.emit_log(&format!("\x1b[1;34m$ docker run -p {port}:{port} {image}\x1b[0m"));
        self.emit_log(&format!(
            "The application will be available at http://localhost:{port}"
        ));
        self.events.emit(Event::BuildDone {
            summary: format!("Built image {image}"),
        });
    }
}

/// Feed the raw framed log stream through the demultiplexer, publishing one
/// `build:log` event per completed line. A read error on the stream is
/// reported as a log line and ends the pump; a corrupt frame is fatal.
async fn pump_logs(
    mut logs: BoxStream<'static, Result<Vec<u8>, RuntimeError>>,
    events: EventBus,
    cancel: CancellationToken,
) -> Result<(), DemuxError> {
    let mut demuxer = LogDemuxer::new();
    let mut lines = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = logs.next() => chunk,
        };
        match chunk {
            None => break,
            Some(Ok(bytes)) => {
                let pushed = demuxer.push(&bytes, &mut lines);
                for line in lines.drain(..) {
                    events.emit(Event::BuildLog { line: line.text });
                }
                pushed?;
            }
            Some(Err(e)) => {
                events.emit(Event::BuildLog {
                    line: format!("Error reading logs: {e}"),
                });
                tracing::warn!(error = %e, "log stream read failed");
                break;
            }
        }
    }

    demuxer.finish(&mut lines);
    for line in lines.drain(..) {
        events.emit(Event::BuildLog { line: line.text });
    }
    Ok(())
}
