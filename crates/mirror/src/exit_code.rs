// Consistent exit codes for the treesync CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   3  = root or path not found
//   10 = daemon not reachable
//   13 = network error

use std::process;

use treesync_common::protocol::jsonrpc::{INVALID_PARAMS, ROOT_NOT_FOUND};
use treesync_mirror::client::{RpcCallError, DAEMON_NOT_RUNNING_EXIT_CODE};
use treesync_mirror::error::SyncError;

use crate::commands::NotFound;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    NotFound = 3,
    DaemonDown = DAEMON_NOT_RUNNING_EXIT_CODE,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if treesync_mirror::client::daemon_unavailable_exit_code(err).is_some() {
            return Self::DaemonDown;
        }

        for cause in err.chain() {
            if let Some(rpc_err) = cause.downcast_ref::<RpcCallError>() {
                return Self::from_rpc_code(rpc_err.code);
            }
            if cause.downcast_ref::<NotFound>().is_some() {
                return Self::NotFound;
            }
            if let Some(sync_err) = cause.downcast_ref::<SyncError>() {
                return match sync_err {
                    SyncError::RootNotFound(_) => Self::NotFound,
                    SyncError::TransientFetch { daemon_down: true, .. } => Self::DaemonDown,
                    SyncError::TransientFetch { .. } => Self::Network,
                    _ => Self::Error,
                };
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused => Self::DaemonDown,
                    std::io::ErrorKind::TimedOut => Self::Network,
                    _ => Self::Error,
                };
            }
        }

        if format!("{err:#}").contains("timed out") {
            return Self::Network;
        }
        Self::Error
    }

    /// Map a daemon JSON-RPC error code to an exit code.
    pub fn from_rpc_code(code: i32) -> Self {
        match code {
            ROOT_NOT_FOUND => Self::NotFound,
            INVALID_PARAMS => Self::Usage,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
