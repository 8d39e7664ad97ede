//! GitHub device-flow login — `packsmith login`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;

use packsmith::auth::{AuthFlow, GitHubClient};
use packsmith::config::Config;
use packsmith::events::{Event, EventBus, spawn_forwarder};

pub async fn cmd_login(config: &Config) -> Result<()> {
    let Some(client_id) = config.auth.resolve_client_id() else {
        anyhow::bail!(
            "No GitHub OAuth client id configured. Set GITHUB_CLIENT_ID or add \
             [auth] client_id to packsmith.toml"
        );
    };

    let (bus, rx) = EventBus::new();
    let forwarder = spawn_forwarder(rx, |envelope| match envelope.event {
        Event::AuthStarted => {
            println!("Waiting for authorization...");
        }
        Event::AuthSuccess { profile, .. } => {
            println!(
                "{} Logged in as {}{}",
                style("✓").green().bold(),
                style(&profile.login).bold(),
                profile
                    .email
                    .as_deref()
                    .map(|e| format!(" <{e}>"))
                    .unwrap_or_default()
            );
        }
        Event::AuthError { message } => {
            eprintln!("{} {message}", style("✗").red().bold());
        }
        _ => {}
    });

    let client = GitHubClient::new(client_id);
    let flow = AuthFlow::new(
        Arc::new(client),
        bus.clone(),
        Duration::from_secs(config.auth.timeout_secs),
    );

    let code = flow.request_code().await?;
    println!(
        "First, copy your one-time code: {}",
        style(&code.user_code).bold()
    );
    println!("Then visit {} to authorize.", style(&code.verification_uri).underlined());
    if open::that(&code.verification_uri).is_err() {
        tracing::debug!("could not open browser; the user can follow the URL by hand");
    }

    let poller = flow.start_polling(code)?;
    poller.await.ok();

    drop(flow);
    drop(bus);
    forwarder.await.ok();
    Ok(())
}
