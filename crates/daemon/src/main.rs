// treesync-daemon: standalone mode entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use treesync_daemon::config::{daemon_config_path, DaemonConfig};

/// Watch directory trees and serve incremental change feeds.
#[derive(Debug, Parser)]
#[command(name = "treesync-daemon", version)]
struct Args {
    /// Root directory to open at startup (repeatable).
    #[arg(long = "root", value_name = "DIR")]
    roots: Vec<PathBuf>,

    /// Config file (defaults to ~/.treesync/daemon.toml).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Socket path override.
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match args.config.as_deref() {
        Some(path) => DaemonConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => DaemonConfig::load(),
    };
    config.roots.extend(args.roots);
    if args.socket.is_some() {
        config.socket_path = args.socket;
    }

    info!(
        config_path = ?args.config.or_else(daemon_config_path),
        roots = config.roots.len(),
        "starting standalone treesync daemon"
    );
    treesync_daemon::runtime::run_standalone(config)
        .await
        .context("standalone daemon terminated unexpectedly")
}
