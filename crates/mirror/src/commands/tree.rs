// `treesync tree`: print mirrored roots as indented trees.

use std::path::PathBuf;

use clap::Args;
use treesync_common::descriptor::Descriptor;
use treesync_mirror::mirror::TreeMirror;
use treesync_mirror::registry::RootView;

use super::{block_on, root_key, Context, NotFound};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Root directory (defaults to every open root).
    pub root: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: TreeArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let root = args.root.as_deref().map(root_key);

    match block_on(load_roots(ctx.mirror(), root)) {
        Ok(views) => {
            output::print_output(format, &views, |views| format_human(views))?;
            output::warn_unsynced(format, &views);
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn load_roots(mirror: TreeMirror, root: Option<String>) -> anyhow::Result<Vec<RootView>> {
    mirror.bootstrap().await?;
    match root {
        None => Ok(mirror.roots()),
        Some(root) => mirror.root(&root).map(|view| vec![view]).ok_or_else(|| NotFound(root).into()),
    }
}

pub(crate) fn format_human(views: &[RootView]) -> String {
    if views.is_empty() {
        return "No open roots.".to_string();
    }
    let mut lines = Vec::new();
    for view in views {
        lines.push(output::root_header(view));
        if let Some(descriptor) = &view.descriptor {
            for child in descriptor.children() {
                render_node(&mut lines, child, 1);
            }
        }
    }
    lines.join("\n")
}

fn render_node(lines: &mut Vec<String>, node: &Descriptor, depth: usize) {
    let indent = "  ".repeat(depth - 1);
    let label = match (node.is_directory(), node.title()) {
        (true, _) => format!("{}/", node.name()),
        (false, Some(title)) if !title.is_empty() => format!("{} ({title})", node.name()),
        (false, _) => node.name().to_string(),
    };
    lines.push(format!("{indent}├─ {label}"));
    for child in node.children() {
        render_node(lines, child, depth + 1);
    }
}
