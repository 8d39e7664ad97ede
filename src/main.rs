use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "packsmith")]
#[command(version, about = "Buildpack builds, GitHub login and a local repo cache")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding packsmith.toml. Defaults to the current directory.
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a source directory into a runnable image with a buildpack
    /// builder
    Build {
        /// Source directory to build
        dir: PathBuf,

        /// Target platform: arm64 or amd64
        #[arg(long, default_value = "arm64")]
        platform: String,
    },
    /// Authenticate against GitHub with the device flow
    Login,
    /// Manage the local cache of cloned repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Clone a repository into the cache
    Clone { url: String },
    /// Show whether a repository is already cloned
    Status { url: String },
    /// List cloned repositories
    List,
    /// Delete a cloned repository
    Rm { path: PathBuf },
}

/// Console logging filtered by `RUST_LOG` (or `-v`), plus a daily-rotated
/// log file under the user's data directory. The guard must live for the
/// whole process.
fn init_tracing(verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if verbose { "packsmith=debug" } else { "packsmith=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = dirs::data_local_dir().map(|base| {
        let log_dir = base.join("packsmith").join("logs");
        let appender = tracing_appender::rolling::daily(log_dir, "packsmith.log");
        tracing_appender::non_blocking(appender)
    });

    match file_layer {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose);

    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = packsmith::config::Config::load(&config_dir)?;

    match &cli.command {
        Commands::Build { dir, platform } => {
            cmd::cmd_build(dir, platform, &config).await?;
        }
        Commands::Login => {
            cmd::cmd_login(&config).await?;
        }
        Commands::Repo { command } => {
            cmd::cmd_repo(command, &config).await?;
        }
    }
    Ok(())
}
