//! The UI event channel.
//!
//! The core is a pure publisher: `EventBus::emit` never blocks and never
//! fails. Events are advisory: if the receiving side is gone the send
//! result is dropped by policy. A shell (CLI, GUI, test harness) consumes
//! the receiver on a dedicated forwarding task.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{AccessToken, UserProfile};

/// Every named event the core publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    #[serde(rename = "build:log")]
    BuildLog { line: String },

    #[serde(rename = "build:done")]
    BuildDone { summary: String },

    #[serde(rename = "build:error")]
    BuildError { message: String },

    #[serde(rename = "github:auth:started")]
    AuthStarted,

    #[serde(rename = "github:auth:success")]
    AuthSuccess {
        token: AccessToken,
        profile: UserProfile,
    },

    #[serde(rename = "github:auth:error")]
    AuthError { message: String },

    #[serde(rename = "directory:selected")]
    DirectorySelected { path: PathBuf },
}

impl Event {
    /// The wire name of this event on the channel.
    pub fn name(&self) -> &'static str {
        match self {
            Event::BuildLog { .. } => "build:log",
            Event::BuildDone { .. } => "build:done",
            Event::BuildError { .. } => "build:error",
            Event::AuthStarted => "github:auth:started",
            Event::AuthSuccess { .. } => "github:auth:success",
            Event::AuthError { .. } => "github:auth:error",
            Event::DirectorySelected { .. } => "directory:selected",
        }
    }
}

/// An event stamped at emission time.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

/// Fire-and-forget publisher handle. Cheap to clone; every subsystem holds
/// one.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish one event. Never blocks; a closed receiver is ignored.
    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.name(), "emit");
        let _ = self.tx.send(Envelope {
            at: Utc::now(),
            event,
        });
    }
}

/// Spawn the dedicated task that drains the channel into `deliver`.
pub fn spawn_forwarder<F>(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    mut deliver: F,
) -> JoinHandle<()>
where
    F: FnMut(Envelope) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            deliver(envelope);
        }
    })
}
