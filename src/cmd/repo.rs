//! Repository cache — `packsmith repo <clone|status|list|rm>`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use packsmith::config::Config;
use packsmith::repo::RepoManager;

use super::super::RepoCommands;

pub async fn cmd_repo(command: &RepoCommands, config: &Config) -> Result<()> {
    let root = match &config.repos.root {
        Some(root) => root.clone(),
        None => RepoManager::default_root()?,
    };
    let manager = Arc::new(RepoManager::new(root)?);

    match command {
        RepoCommands::Clone { url } => {
            let url = url.clone();
            let manager = Arc::clone(&manager);
            // git2 clones synchronously; keep it off the async runtime.
            let path = tokio::task::spawn_blocking(move || manager.clone_repo(&url))
                .await
                .context("clone task panicked")??;
            println!("Cloned into {}", style(path.display()).bold());
        }
        RepoCommands::Status { url } => {
            let status = manager.status(url)?;
            if status.is_cloned {
                println!("cloned at {}", status.path.display());
            } else {
                println!("not cloned (would live at {})", status.path.display());
            }
        }
        RepoCommands::List => {
            let repos = manager.list()?;
            if repos.is_empty() {
                println!("No repositories cloned.");
            } else {
                for path in repos {
                    println!("{}", path.display());
                }
            }
        }
        RepoCommands::Rm { path } => {
            manager.delete(path)?;
            println!("Deleted {}", path.display());
        }
    }
    Ok(())
}
