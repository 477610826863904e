// `treesync find`: look up one node by absolute path.

use std::path::PathBuf;

use clap::Args;
use treesync_common::descriptor::Descriptor;
use treesync_mirror::mirror::TreeMirror;

use super::{block_on, root_key, Context, NotFound};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct FindArgs {
    /// File or directory path inside an open root.
    pub path: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: FindArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let path = root_key(&args.path);

    match block_on(find(ctx.mirror(), path)) {
        Ok(descriptor) => {
            output::print_output(format, &descriptor, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn find(mirror: TreeMirror, path: String) -> anyhow::Result<Descriptor> {
    mirror.bootstrap().await?;
    mirror.find(&path).ok_or_else(|| NotFound(path).into())
}

fn format_human(descriptor: &Descriptor) -> String {
    let kind = match descriptor {
        Descriptor::File(_) => "file",
        Descriptor::Code(_) => "code",
        Descriptor::Other(_) => "other",
        Descriptor::Directory(_) => "directory",
    };
    let mut lines = vec![
        descriptor.path().to_string(),
        format!("  kind:     {kind}"),
        format!("  modified: {}", descriptor.modification_time().to_rfc3339()),
    ];
    if let Some(title) = descriptor.title() {
        lines.push(format!("  title:    {title}"));
    }
    if let Some(heading) = descriptor.heading() {
        lines.push(format!("  heading:  {heading}"));
    }
    if descriptor.is_directory() {
        lines.push(format!("  entries:  {}", descriptor.children().len()));
    }
    lines.join("\n")
}
