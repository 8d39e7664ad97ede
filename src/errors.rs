//! Typed error hierarchy for packsmith.
//!
//! One top-level enum per subsystem:
//! - `RuntimeError` — container engine façade failures
//! - `BuildError` — build orchestration failures
//! - `AuthError` — device authorization flow failures
//! - `RepoError` — repository cache failures
//!
//! The demultiplexer's `DemuxError` lives next to the parser in
//! `crate::demux`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::demux::DemuxError;

/// Errors from the container runtime client. Each variant names the failed
/// operation and carries the underlying cause.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to connect to the container engine: {0}")]
    Connect(#[source] anyhow::Error),

    #[error("Failed to inspect image {image}: {source}")]
    InspectImage {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to pull image {image}: {source}")]
    PullImage {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to create container: {0}")]
    CreateContainer(#[source] anyhow::Error),

    #[error("Failed to start container {id}: {source}")]
    StartContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to stream logs for container {id}: {source}")]
    StreamLogs {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to wait for container {id}: {source}")]
    WaitContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to remove container {id}: {source}")]
    RemoveContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from one build attempt.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Source directory does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Invalid target platform '{value}' (expected arm64 or amd64)")]
    InvalidPlatform { value: String },

    #[error("Image pull completed but {image} is still missing")]
    ImageMissingAfterPull { image: String },

    #[error("build failed with exit code {code}")]
    ExitStatus { code: i64 },

    #[error("error waiting for container: {0}")]
    Wait(#[source] RuntimeError),

    #[error("Log stream corrupted: {0}")]
    CorruptLogStream(#[from] DemuxError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors from the device authorization flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to request device code: {0}")]
    DeviceCode(#[source] anyhow::Error),

    #[error("Token exchange failed: {0}")]
    Exchange(#[source] anyhow::Error),

    #[error("GitHub reported '{code}' during authorization")]
    Server { code: String },

    #[error("Authorization was denied")]
    Denied,

    #[error("Device code expired before authorization completed")]
    Expired,

    #[error("Authorization timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Authorization attempt cancelled")]
    Cancelled,

    #[error("An authorization attempt is already in progress")]
    AttemptInFlight,

    #[error("Failed to fetch user profile: {0}")]
    Profile(#[source] anyhow::Error),
}

/// Errors from the repository cache manager.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Could not derive a repository name from URL '{url}'")]
    InvalidUrl { url: String },

    #[error("Repository already cloned at {path}")]
    AlreadyCloned { path: PathBuf },

    #[error("Failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to open repository at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Repository path does not exist: {path}")]
    NotFound { path: PathBuf },

    #[error("Repository path still exists after deletion: {path}")]
    DeleteIncomplete { path: PathBuf },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
