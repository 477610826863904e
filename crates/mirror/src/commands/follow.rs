// `treesync follow`: keep a live mirror and print each root as it changes.

use clap::Args;
use serde::Serialize;
use treesync_mirror::registry::RootView;

use super::{block_on, Context};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct FollowArgs {
    /// Force JSON output (one event per line).
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum FollowEvent {
    Updated { root: RootView },
    Removed { root_path: String },
}

pub fn run(args: FollowArgs, ctx: &Context) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = block_on(follow(ctx, format));
    if let Err(e) = &result {
        output::print_anyhow_error(format, e);
    }
    result
}

#[cfg(unix)]
async fn follow(ctx: &Context, format: OutputFormat) -> anyhow::Result<()> {
    let mirror = ctx.mirror();
    // Subscribe before loading so no change between the two is missed.
    let mut notifications = ctx.client().subscribe().await?;
    mirror.bootstrap().await?;
    for root in mirror.roots() {
        output::print_output(format, &FollowEvent::Updated { root }, format_human)?;
    }

    loop {
        let next = tokio::select! {
            next = notifications.next() => next?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(notification) = next else {
            output::print_warning(format, "DAEMON_CLOSED", "daemon closed the notification stream");
            break;
        };

        let root_path = notification.root_path().to_string();
        mirror.handle_notification(notification);
        mirror.wait_idle().await;

        let event = match mirror.root(&root_path) {
            Some(root) => FollowEvent::Updated { root },
            None => FollowEvent::Removed { root_path },
        };
        output::print_output(format, &event, format_human)?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn follow(_ctx: &Context, _format: OutputFormat) -> anyhow::Result<()> {
    anyhow::bail!("following requires a unix socket transport")
}

fn format_human(event: &FollowEvent) -> String {
    match event {
        FollowEvent::Updated { root } => {
            let entries = root.descriptor.as_ref().map_or(0, |d| d.node_count().saturating_sub(1));
            format!("{}: {entries} entries", output::root_header(root))
        }
        FollowEvent::Removed { root_path } => format!("{root_path}: removed"),
    }
}
