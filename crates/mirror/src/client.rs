use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use treesync_common::descriptor::{ChangesSince, Snapshot};
use treesync_common::protocol::jsonrpc::{Notification, CURRENT_PROTOCOL_VERSION, ROOT_NOT_FOUND};
use treesync_common::protocol::rpc_methods::{
    ROOT_CLOSE, ROOT_LIST, ROOT_OPEN, TREE_CHANGES_SINCE, TREE_INITIAL, TREE_SUBSCRIBE,
};
use treesync_common::protocol::tree::{ChangesSinceParams, RootNotification, RootParams, RootSummary};

#[cfg(unix)]
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio::time::timeout;

use crate::error::SyncError;
use crate::fetch::{DeltaFetchClient, FetchFuture};

pub const DAEMON_NOT_RUNNING_EXIT_CODE: i32 = 10;

const SOCKET_RELATIVE_PATH: &str = ".treesync/daemon.sock";
const DEFAULT_TIMEOUT_SECS: u64 = 3;

#[derive(Debug)]
pub struct DaemonUnavailable {
    socket_path: PathBuf,
    source: io::Error,
}

impl DaemonUnavailable {
    fn new(socket_path: PathBuf, source: io::Error) -> Self {
        Self { socket_path, source }
    }

    pub fn exit_code(&self) -> i32 {
        DAEMON_NOT_RUNNING_EXIT_CODE
    }
}

impl fmt::Display for DaemonUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "daemon is not running (socket `{}`); use exit code {}",
            self.socket_path.display(),
            self.exit_code()
        )
    }
}

impl std::error::Error for DaemonUnavailable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// An error object returned by the daemon, kept typed in the `anyhow` chain.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("daemon json-rpc error {code}: {message} (data: {})", data_display(.data))]
pub struct RpcCallError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

fn data_display(data: &Option<Value>) -> String {
    data.as_ref().map(Value::to_string).unwrap_or_else(|| "null".to_string())
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    protocol_version: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: Value,
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_request_id: Arc<AtomicU64>,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Clone,
        R: DeserializeOwned,
    {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);

        match self.call_once(id, method, params.clone()).await {
            Ok(response) => Ok(response),
            // The daemon answered; asking again would get the same answer.
            Err(error) if error.downcast_ref::<RpcCallError>().is_some() => Err(error),
            Err(first_error) => {
                // Retry once for transient socket drops / daemon restarts.
                self.call_once(id, method, params).await.map_err(|second_error| {
                    second_error.context(format!(
                        "json-rpc call failed after retry; first error: {first_error:#}"
                    ))
                })
            }
        }
    }

    async fn call_once<P, R>(&self, id: u64, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        #[cfg(unix)]
        {
            let (read_half, mut write_half) = self.connect().await?;
            self.write_request(&mut write_half, id, method, params).await?;

            let mut reader = BufReader::new(read_half);
            let mut response_line = Vec::new();
            timeout(self.timeout, reader.read_until(b'\n', &mut response_line))
                .await
                .context("timed out waiting for json-rpc response")?
                .context("failed reading json-rpc response from daemon socket")?;

            return decode_response(&response_line);
        }

        #[cfg(not(unix))]
        {
            let _ = id;
            let _ = method;
            let _ = params;
            anyhow::bail!("windows named pipe transport is not implemented yet")
        }
    }

    #[cfg(unix)]
    async fn connect(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("timed out connecting to daemon socket")?
            .map_err(|err| {
                if is_daemon_unavailable_kind(err.kind()) {
                    anyhow!(DaemonUnavailable::new(self.socket_path.clone(), err))
                } else {
                    anyhow!(err)
                }
            })
            .with_context(|| {
                format!("failed to connect to daemon socket `{}`", self.socket_path.display())
            })?;
        Ok(stream.into_split())
    }

    #[cfg(unix)]
    async fn write_request<P: Serialize>(
        &self,
        write_half: &mut OwnedWriteHalf,
        id: u64,
        method: &str,
        params: P,
    ) -> Result<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            protocol_version: CURRENT_PROTOCOL_VERSION,
            id,
            method,
            params,
        };
        let mut payload =
            serde_json::to_vec(&request).context("failed to serialize json-rpc request")?;
        payload.push(b'\n');

        timeout(self.timeout, write_half.write_all(&payload))
            .await
            .context("timed out writing json-rpc request")?
            .context("failed writing json-rpc request to daemon socket")?;
        timeout(self.timeout, write_half.flush())
            .await
            .context("timed out flushing json-rpc request")?
            .context("failed flushing json-rpc request to daemon socket")?;
        Ok(())
    }

    // ── Typed methods ──────────────────────────────────────────────────

    pub async fn changes_since(&self, root_path: &str, version: Option<u64>) -> Result<ChangesSince> {
        let params = ChangesSinceParams { root_path: root_path.to_string(), version };
        self.call(TREE_CHANGES_SINCE, params).await
    }

    pub async fn initial(&self) -> Result<Vec<Snapshot>> {
        self.call(TREE_INITIAL, json!({})).await
    }

    pub async fn open_root(&self, root_path: &str) -> Result<RootSummary> {
        self.call(ROOT_OPEN, RootParams { root_path: root_path.to_string() }).await
    }

    /// Returns whether the daemon had the root open.
    pub async fn close_root(&self, root_path: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct Closed {
            closed: bool,
        }
        let closed: Closed =
            self.call(ROOT_CLOSE, RootParams { root_path: root_path.to_string() }).await?;
        Ok(closed.closed)
    }

    pub async fn list_roots(&self) -> Result<Vec<RootSummary>> {
        #[derive(Deserialize)]
        struct Roots {
            roots: Vec<RootSummary>,
        }
        let roots: Roots = self.call(ROOT_LIST, json!({})).await?;
        Ok(roots.roots)
    }

    /// Open a dedicated connection that streams root notifications.
    #[cfg(unix)]
    pub async fn subscribe(&self) -> Result<NotificationStream> {
        let (read_half, mut write_half) = self.connect().await?;
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.write_request(&mut write_half, id, TREE_SUBSCRIBE, json!({})).await?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = Vec::new();
        timeout(self.timeout, reader.read_until(b'\n', &mut response_line))
            .await
            .context("timed out waiting for tree.subscribe response")?
            .context("failed reading tree.subscribe response")?;
        let _: Value = decode_response(&response_line)?;

        debug!(socket_path = %self.socket_path.display(), "subscribed to root notifications");
        Ok(NotificationStream { reader, _write_half: write_half })
    }
}

/// Root notifications pushed on a subscribed connection.
#[cfg(unix)]
pub struct NotificationStream {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half would half-close the connection.
    _write_half: OwnedWriteHalf,
}

#[cfg(unix)]
impl NotificationStream {
    /// Next notification, or `None` once the daemon hangs up.
    pub async fn next(&mut self) -> Result<Option<RootNotification>> {
        loop {
            let mut line = Vec::new();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut line)
                .await
                .context("failed reading notification from daemon socket")?;
            if bytes_read == 0 {
                return Ok(None);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let notification: Notification =
                serde_json::from_slice(&line).context("failed to decode daemon notification")?;
            match RootNotification::from_notification(&notification) {
                Some(notification) => return Ok(Some(notification)),
                None => debug!(method = %notification.method, "ignoring unknown notification"),
            }
        }
    }
}

impl DeltaFetchClient for DaemonClient {
    fn fetch_changes(
        &self,
        root_path: String,
        known_version: Option<u64>,
    ) -> FetchFuture<ChangesSince> {
        let client = self.clone();
        Box::pin(async move {
            client
                .changes_since(&root_path, known_version)
                .await
                .map_err(|error| fetch_error(root_path, &error))
        })
    }

    fn initial_tree_data(&self) -> FetchFuture<Vec<Snapshot>> {
        let client = self.clone();
        Box::pin(async move { client.initial().await.map_err(|error| fetch_error("*", &error)) })
    }
}

fn fetch_error(root_path: impl Into<String>, error: &anyhow::Error) -> SyncError {
    let root_path = root_path.into();
    match error.downcast_ref::<RpcCallError>() {
        Some(rpc) if rpc.code == ROOT_NOT_FOUND => SyncError::RootNotFound(root_path),
        _ => SyncError::transient(root_path, error),
    }
}

fn decode_response<R: DeserializeOwned>(line: &[u8]) -> Result<R> {
    if line.is_empty() {
        anyhow::bail!("daemon returned an empty json-rpc response");
    }

    let response: JsonRpcResponse<R> =
        serde_json::from_slice(line).context("failed to decode daemon json-rpc response")?;

    if let Some(error) = response.error {
        return Err(anyhow!(RpcCallError {
            code: error.code,
            message: error.message,
            data: error.data,
        }));
    }

    response.result.context("daemon json-rpc response missing `result` field")
}

pub fn daemon_unavailable_exit_code(error: &anyhow::Error) -> Option<i32> {
    error.downcast_ref::<DaemonUnavailable>().map(DaemonUnavailable::exit_code)
}

pub fn default_socket_path() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SOCKET_RELATIVE_PATH)
}

fn is_daemon_unavailable_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}
