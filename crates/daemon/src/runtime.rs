use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::rpc::methods::RpcServerState;
use crate::rpc::unix::serve_unix_until_shutdown;
use crate::startup::{bind_socket, is_daemon_running, remove_pid_file, write_pid_file, DaemonPaths};
use crate::store::RootStore;
use crate::watcher::debounce::DebounceConfig;
use crate::watcher::pipeline::{run_pipeline, PipelineConfig};
use crate::watcher::EVENT_CHANNEL_CAPACITY;

pub async fn run_standalone(config: DaemonConfig) -> Result<()> {
    let mut paths = DaemonPaths::resolve()?;
    if let Some(socket_path) = &config.socket_path {
        paths = paths.with_socket_path(socket_path.clone());
    }
    run_standalone_with_paths(config, paths).await
}

pub async fn run_standalone_with_paths(config: DaemonConfig, paths: DaemonPaths) -> Result<()> {
    if is_daemon_running(&paths.socket_path).await {
        bail!("a daemon is already listening on `{}`", paths.socket_path.display());
    }

    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let (raw_tx, raw_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let state = RpcServerState::new(RootStore::new(config.history_capacity))
        .with_shutdown_notifier(shutdown_tx.clone())
        .with_watcher(raw_tx);

    let pipeline_config = PipelineConfig {
        debounce: DebounceConfig::with_millis(config.debounce_ms),
        ..PipelineConfig::default()
    };
    let pipeline = tokio::spawn(run_pipeline(
        raw_rx,
        state.store().clone(),
        state.notifier().clone(),
        pipeline_config,
        shutdown_tx.subscribe(),
    ));

    for root in &config.roots {
        match state.open_root(root).await {
            Ok(summary) => info!(root_path = %summary.root_path, "opened configured root"),
            Err(error) => warn!(root = %root.display(), error = %error, "skipping configured root"),
        }
    }

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(());
    });

    info!(socket_path = %paths.socket_path.display(), "standalone daemon started");
    let result = serve_unix_until_shutdown(listener, state, shutdown_rx).await;

    // Stop the pipeline even when the listener failed on its own.
    let _ = shutdown_tx.send(());
    if let Err(error) = pipeline.await {
        warn!(?error, "watcher pipeline task failed");
    }
    cleanup_paths(&paths);
    result.context("standalone daemon exited with error")
}

fn cleanup_paths(paths: &DaemonPaths) {
    remove_pid_file(&paths.pid_path);
    let _ = std::fs::remove_file(&paths.socket_path);
}
