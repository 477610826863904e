// `treesync open|close|roots`: manage the daemon's watched roots.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use serde::Serialize;
use treesync_common::protocol::tree::RootSummary;

use super::{block_on, root_key, Context};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct OpenArgs {
    /// Directory to watch.
    pub root: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct CloseArgs {
    /// Directory to stop watching.
    pub root: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct RootsArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct CloseResult {
    root_path: String,
    closed: bool,
}

pub fn open(args: OpenArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let root = std::fs::canonicalize(&args.root)
        .with_context(|| format!("cannot open `{}`", args.root.display()));
    let client = ctx.client();
    let result = root.and_then(|root| {
        block_on(async move { client.open_root(&root.to_string_lossy()).await })
    });
    finish(format, result, |summary| format!("Watching {} (v{})", summary.root_path, summary.version))
}

pub fn close(args: CloseArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let root_path = root_key(&args.root);
    let client = ctx.client();
    let result = block_on(async move {
        let closed = client.close_root(&root_path).await?;
        Ok(CloseResult { root_path, closed })
    });
    finish(format, result, |result| {
        if result.closed {
            format!("Stopped watching {}", result.root_path)
        } else {
            format!("{} was not open", result.root_path)
        }
    })
}

pub fn list(args: RootsArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let client = ctx.client();
    let result = block_on(async move { client.list_roots().await });
    finish(format, result, |roots| format_roots(roots))
}

fn finish<T, F>(format: OutputFormat, result: anyhow::Result<T>, human_fn: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match result {
        Ok(value) => {
            output::print_output(format, &value, human_fn)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn format_roots(roots: &[RootSummary]) -> String {
    if roots.is_empty() {
        return "No open roots.".to_string();
    }
    roots
        .iter()
        .map(|root| format!("{}  v{}", root.root_path, root.version))
        .collect::<Vec<_>>()
        .join("\n")
}
