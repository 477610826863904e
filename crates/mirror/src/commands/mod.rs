// CLI subcommand dispatch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Subcommand;
use thiserror::Error;
use treesync_mirror::client::DaemonClient;
use treesync_mirror::config::MirrorConfig;
use treesync_mirror::mirror::TreeMirror;

pub mod find;
pub mod follow;
pub mod roots;
pub mod tree;

#[derive(Subcommand)]
pub enum Command {
    /// Print the mirrored tree of every open root, or of one root
    Tree(tree::TreeArgs),
    /// Look up a single file or directory by absolute path
    Find(find::FindArgs),
    /// Keep a mirror in sync and print each root as it updates
    Follow(follow::FollowArgs),
    /// Ask the daemon to start watching a directory
    Open(roots::OpenArgs),
    /// Ask the daemon to stop watching a directory
    Close(roots::CloseArgs),
    /// List the roots the daemon is watching
    Roots(roots::RootsArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: MirrorConfig,
}

impl Context {
    pub fn client(&self) -> DaemonClient {
        DaemonClient::new(self.config.socket_path())
    }

    pub fn mirror(&self) -> TreeMirror {
        TreeMirror::new(Arc::new(self.client()), self.config.sort.clone())
    }
}

/// A path the mirror does not know about.
#[derive(Debug, Error)]
#[error("`{0}` is not in any open root")]
pub struct NotFound(pub String);

pub fn run(cmd: Command, ctx: Context) -> anyhow::Result<()> {
    match cmd {
        Command::Tree(args) => tree::run(args, &ctx),
        Command::Find(args) => find::run(args, &ctx),
        Command::Follow(args) => follow::run(args, &ctx),
        Command::Open(args) => roots::open(args, &ctx),
        Command::Close(args) => roots::close(args, &ctx),
        Command::Roots(args) => roots::list(args, &ctx),
    }
}

/// Drive one command's future on a fresh current-thread runtime.
pub(crate) fn block_on<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(future)
}

/// Roots are keyed by the daemon's canonical path; fall back to the
/// argument as given when it does not resolve locally.
pub(crate) fn root_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .into_owned()
}
