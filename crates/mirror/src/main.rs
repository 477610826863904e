// treesync CLI entry point.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use treesync_mirror::config::MirrorConfig;

mod commands;
mod exit_code;
mod output;

use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "treesync", about = "Mirror directory trees served by treesync-daemon", version)]
struct Cli {
    /// Mirror config file (defaults to ~/.treesync/mirror.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Daemon socket override.
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config.as_deref() {
        Some(path) => match MirrorConfig::load_from(path) {
            Ok(config) => config,
            Err(error) => {
                eprintln!("error: failed to load config `{}`: {error}", path.display());
                return ExitCode::Usage.into();
            }
        },
        None => MirrorConfig::load(),
    };
    if cli.socket.is_some() {
        config.socket_path = cli.socket;
    }

    match commands::run(cli.command, commands::Context { config }) {
        Ok(()) => ExitCode::Success.into(),
        // The command already reported the error in the selected format.
        Err(error) => ExitCode::from_error(&error).into(),
    }
}
