//! Container build — `packsmith build <dir>`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use packsmith::build::{BuildEngine, BuildRequest, Platform};
use packsmith::config::Config;
use packsmith::events::{Event, EventBus, spawn_forwarder};
use packsmith::runtime::DockerRuntime;

pub async fn cmd_build(dir: &Path, platform: &str, config: &Config) -> Result<()> {
    let platform: Platform = platform.parse()?;
    let request = BuildRequest::new(dir, platform);

    let runtime = DockerRuntime::connect().context("Is the Docker daemon running?")?;

    let (bus, rx) = EventBus::new();
    let forwarder = spawn_forwarder(rx, |envelope| match envelope.event {
        Event::BuildLog { line } => println!("{line}"),
        Event::BuildDone { summary } => {
            tracing::info!(%summary, "build finished");
        }
        // The failure itself is returned to the caller; the event is for
        // channel subscribers.
        Event::BuildError { message } => tracing::warn!(%message, "build failed"),
        _ => {}
    });

    let engine = BuildEngine::new(Arc::new(runtime), bus.clone(), config.build.clone());
    bus.emit(Event::DirectorySelected {
        path: dir.to_path_buf(),
    });

    // Ctrl-C stops log forwarding; the container cleanup still runs.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = engine.build(&request, &cancel).await;
    if let Err(err) = &result {
        bus.emit(Event::BuildError {
            message: err.to_string(),
        });
    }

    // Drop every sender so the forwarder drains and exits.
    drop(engine);
    drop(bus);
    forwarder.await.ok();

    result.map_err(Into::into)
}
