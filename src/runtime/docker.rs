//! Docker Engine implementation of [`ContainerRuntime`] via bollard.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::demux::{StreamKind, encode_frame};
use crate::errors::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSpec, PullProgress};

/// Client for a local Docker daemon. The Engine API version is pinned at
/// compile time by bollard.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform's default local socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.into()))?;
        Ok(Self { docker })
    }
}

/// bollard decodes the engine's multiplexed stream into typed frames;
/// re-encode them so the trait's contract stays the raw wire format.
fn frame_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdErr { message } => encode_frame(StreamKind::Stderr, &message),
        LogOutput::StdOut { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => encode_frame(StreamKind::Stdout, &message),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_image(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::InspectImage {
                image: image.to_string(),
                source: e.into(),
            }),
        }
    }

    fn pull_image(&self, image: &str) -> BoxStream<'static, Result<PullProgress, RuntimeError>> {
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let image = image.to_string();
        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => Ok(PullProgress {
                    status: info.status,
                    id: info.id,
                }),
                Err(e) => Err(RuntimeError::PullImage {
                    image: image.clone(),
                    source: e.into(),
                }),
            })
            .boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            user: Some(spec.user.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                security_opt: Some(spec.security_opt.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|e| RuntimeError::CreateContainer(e.into()))?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::StartContainer {
                id: id.to_string(),
                source: e.into(),
            })
    }

    fn stream_logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>, RuntimeError>> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .follow(true)
            .build();
        let id = id.to_string();
        let logs = self.docker.logs(&id, Some(options));
        logs.map(move |item| match item {
            Ok(output) => Ok(frame_bytes(output)),
            Err(e) => Err(RuntimeError::StreamLogs {
                id: id.clone(),
                source: e.into(),
            }),
        })
        .boxed()
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut wait = self.docker.wait_container(id, None::<WaitContainerOptions>);
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard encodes a non-zero exit as an error; surface it as a
            // plain exit code so the caller decides what it means.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::WaitContainer {
                id: id.to_string(),
                source: e.into(),
            }),
            None => Err(RuntimeError::WaitContainer {
                id: id.to_string(),
                source: anyhow::anyhow!("wait stream ended without a status"),
            }),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| RuntimeError::RemoveContainer {
                id: id.to_string(),
                source: e.into(),
            })
    }
}
