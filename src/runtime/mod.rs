//! Thin façade over a container engine's control API.
//!
//! The build engine drives this trait and nothing else, so a test can swap
//! in a scripted runtime and the production path can swap engines without
//! touching orchestration code. `DockerRuntime` is the Docker Engine
//! implementation.

mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::errors::RuntimeError;

/// One progress record from an image pull.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub status: Option<String>,
    pub id: Option<String>,
}

/// Everything needed to create a build container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// Host-path bind mounts in `host:container` form.
    pub binds: Vec<String>,
    pub user: String,
    pub security_opt: Vec<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether `image` is present locally. Absence is `Ok(false)`; only
    /// infrastructure failures are errors.
    async fn inspect_image(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pull `image`, yielding progress records. The stream is finite: it
    /// ends when the pull completes or fails.
    fn pull_image(&self, image: &str) -> BoxStream<'static, Result<PullProgress, RuntimeError>>;

    /// Create a container and return its runtime-assigned id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Follow the container's log output as the raw framed byte stream
    /// (see `crate::demux`). Stays open until the container stops or the
    /// stream is dropped.
    fn stream_logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>, RuntimeError>>;

    /// Block until the container is no longer running; returns its exit
    /// code. A non-zero code is a normal result here; the caller decides
    /// what it means.
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Best-effort removal. Callers log a failure instead of propagating
    /// it so cleanup never masks the primary result.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}
