use anyhow::{Context, Result};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use treesync_common::protocol::jsonrpc::Request;
use treesync_common::protocol::rpc_methods::TREE_SUBSCRIBE;
use treesync_common::protocol::tree::RootNotification;

use crate::rpc::methods::{handle_raw_request, RpcServerState};

/// Serve JSON-RPC 2.0 over Unix domain sockets.
///
/// Framing is newline-delimited JSON, matching the mirror client transport.
#[cfg(unix)]
pub async fn serve_unix(listener: UnixListener, state: RpcServerState) -> Result<()> {
    loop {
        let (stream, _) =
            listener.accept().await.context("failed to accept unix rpc connection")?;
        spawn_connection(stream, state.clone());
    }
}

/// Like [`serve_unix`] but stops accepting once `shutdown` fires.
#[cfg(unix)]
pub async fn serve_unix_until_shutdown(
    listener: UnixListener,
    state: RpcServerState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("rpc listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed to accept unix rpc connection")?;
                spawn_connection(stream, state.clone());
            }
        }
    }
}

#[cfg(unix)]
fn spawn_connection(stream: tokio::net::UnixStream, state: RpcServerState) {
    tokio::spawn(async move {
        if let Err(error) = serve_connection(stream, state).await {
            warn!(?error, "unix rpc connection failed");
        }
    });
}

/// Handle a single RPC stream. Each request line yields one response line.
/// After a successful `tree.subscribe` the connection also carries root
/// notifications until the peer hangs up.
pub async fn serve_connection<IO>(stream: IO, state: RpcServerState) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut subscription: Option<broadcast::Receiver<RootNotification>> = None;
    // Kept across iterations so a read interrupted by a notification resumes
    // where it left off.
    let mut request_line = Vec::new();

    loop {
        let incoming = match subscription.as_mut() {
            None => Incoming::Line(reader.read_until(b'\n', &mut request_line).await),
            Some(receiver) => tokio::select! {
                read = reader.read_until(b'\n', &mut request_line) => Incoming::Line(read),
                received = receiver.recv() => Incoming::Notification(received),
            },
        };

        let bytes_read = match incoming {
            Incoming::Line(read) => read.context("failed to read json-rpc request")?,
            Incoming::Notification(Ok(notification)) => {
                write_notification(&mut write_half, &notification).await?;
                continue;
            }
            Incoming::Notification(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "subscriber lagged, announcing every root");
                for root in state.list_roots().await {
                    let notification = RootNotification::RootChanged { root_path: root.root_path };
                    write_notification(&mut write_half, &notification).await?;
                }
                continue;
            }
            Incoming::Notification(Err(RecvError::Closed)) => {
                debug!("notification channel closed");
                subscription = None;
                continue;
            }
        };

        if bytes_read == 0 {
            return Ok(());
        }

        let mut line = std::mem::take(&mut request_line);
        trim_line_endings(&mut line);
        if line.iter().all(|byte| byte.is_ascii_whitespace()) {
            continue;
        }

        // Subscribe before answering so no notification falls in between.
        let pending_subscription = (subscription.is_none() && is_subscribe_request(&line))
            .then(|| state.subscribe_notifications());

        let response = handle_raw_request(&line, &state).await;
        let mut encoded =
            serde_json::to_vec(&response).context("failed to serialize json-rpc response")?;
        encoded.push(b'\n');

        write_half.write_all(&encoded).await.context("failed to write json-rpc response")?;
        write_half.flush().await.context("failed to flush json-rpc response")?;

        if response.error.is_none() {
            if let Some(receiver) = pending_subscription {
                debug!("connection subscribed to root notifications");
                subscription = Some(receiver);
            }
        }
    }
}

enum Incoming {
    Line(std::io::Result<usize>),
    Notification(Result<RootNotification, RecvError>),
}

async fn write_notification<W>(write_half: &mut W, notification: &RootNotification) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(&notification.to_notification())
        .context("failed to serialize json-rpc notification")?;
    encoded.push(b'\n');
    write_half.write_all(&encoded).await.context("failed to write json-rpc notification")?;
    write_half.flush().await.context("failed to flush json-rpc notification")?;
    Ok(())
}

fn is_subscribe_request(line: &[u8]) -> bool {
    serde_json::from_slice::<Request>(line).is_ok_and(|request| request.method == TREE_SUBSCRIBE)
}

fn trim_line_endings(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}
