// CLI output: human text on a terminal, one JSON value per line otherwise.
//
// Results go to stdout; errors and warnings go to stderr in the same format.

use std::io::{self, IsTerminal, Write};

use serde::Serialize;
use treesync_common::protocol::jsonrpc::{INVALID_PARAMS, ROOT_NOT_FOUND};
use treesync_mirror::client::{daemon_unavailable_exit_code, RpcCallError};
use treesync_mirror::registry::{RootState, RootView};

use crate::commands::NotFound;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// JSON when `--json` was passed or stdout is not a terminal.
    pub fn detect(json_flag: bool) -> Self {
        Self::choose(json_flag, io::stdout().is_terminal())
    }

    fn choose(json_flag: bool, stdout_is_tty: bool) -> Self {
        if json_flag || !stdout_is_tty {
            Self::Json
        } else {
            Self::Human
        }
    }
}

pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

pub fn write_output<W, T, F>(writer: &mut W, format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => writeln!(writer, "{}", human_fn(value)),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

// ── Notices (stderr) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Level {
    Error,
    Warning,
}

#[derive(Debug, Serialize)]
struct Notice<'a> {
    level: Level,
    code: &'a str,
    message: &'a str,
}

fn write_notice<W: Write>(writer: &mut W, format: OutputFormat, color: bool, notice: &Notice<'_>) -> io::Result<()> {
    match format {
        OutputFormat::Human => {
            let (label, paint) = match notice.level {
                Level::Error => ("error", ANSI_RED),
                Level::Warning => ("warning", ANSI_YELLOW),
            };
            if color {
                writeln!(writer, "{paint}{label}:{ANSI_RESET} {}", notice.message)
            } else {
                writeln!(writer, "{label}: {}", notice.message)
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, notice).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

fn emit(format: OutputFormat, notice: Notice<'_>) {
    let stderr = io::stderr();
    let color = stderr.is_terminal();
    // Nowhere left to report a failed stderr write.
    let _ = write_notice(&mut stderr.lock(), format, color, &notice);
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    emit(format, Notice { level: Level::Warning, code, message });
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    emit(format, Notice { level: Level::Error, code, message: &message });
}

// ── Roots ────────────────────────────────────────────────────────────

/// `/notes v12`, with a marker unless the root is synced.
pub fn root_header(view: &RootView) -> String {
    let marker = match view.state {
        RootState::Synced => "",
        RootState::Updating => " [updating]",
        RootState::Loading => " [loading]",
        RootState::Stale => " [stale]",
    };
    format!("{} v{}{marker}", view.root_path, view.version)
}

/// Warn about every root whose tree is missing or out of date.
pub fn warn_unsynced(format: OutputFormat, views: &[RootView]) {
    for view in views {
        if let Some((code, message)) = unsynced_notice(view) {
            print_warning(format, code, &message);
        }
    }
}

fn unsynced_notice(view: &RootView) -> Option<(&'static str, String)> {
    match view.state {
        RootState::Stale => Some((
            "ROOT_STALE",
            format!("{} could not be refreshed; showing version {}", view.root_path, view.version),
        )),
        RootState::Loading => {
            Some(("ROOT_LOADING", format!("{} has not finished loading", view.root_path)))
        }
        RootState::Synced | RootState::Updating => None,
    }
}

// ── Errors ───────────────────────────────────────────────────────────

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if daemon_unavailable_exit_code(error).is_some()
        || (lower.contains("daemon")
            && lower.contains("socket")
            && (lower.contains("connection refused") || lower.contains("failed to connect")))
    {
        return (
            "DAEMON_NOT_RUNNING",
            "Daemon is not running. Start it with: treesync-daemon --root <DIR>".to_string(),
        );
    }

    if lower.contains("timed out") {
        return (
            "NETWORK_TIMEOUT",
            "Could not reach daemon. Check if treesync-daemon is running: ps aux | grep treesync-daemon"
                .to_string(),
        );
    }

    let rpc_code = error.chain().find_map(|cause| cause.downcast_ref::<RpcCallError>()).map(|e| e.code);
    if rpc_code == Some(ROOT_NOT_FOUND)
        || error.chain().any(|cause| cause.downcast_ref::<NotFound>().is_some())
    {
        let name = extract_backticked(&message).unwrap_or_else(|| "<path>".to_string());
        return (
            "ROOT_NOT_FOUND",
            format!("{name} is not in any open root. Run: treesync roots to see open roots"),
        );
    }

    if rpc_code == Some(INVALID_PARAMS) {
        return ("INVALID_ARGUMENT", message);
    }

    ("RPC_ERROR", message)
}

fn extract_backticked(message: &str) -> Option<String> {
    let mut parts = message.split('`');
    let _before = parts.next()?;
    let candidate = parts.next()?.trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}
