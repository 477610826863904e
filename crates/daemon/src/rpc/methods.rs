use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use treesync_common::protocol::jsonrpc::{
    is_supported_protocol_version, Request, RequestId, Response, RpcError, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, ROOT_NOT_FOUND,
};
use treesync_common::protocol::rpc_methods::{
    DAEMON_SHUTDOWN, NOTIFICATIONS, ROOT_CLOSE, ROOT_LIST, ROOT_OPEN, RPC_PING, TREE_CHANGES_SINCE,
    TREE_INITIAL, TREE_SUBSCRIBE,
};
use treesync_common::protocol::tree::{
    ChangesSinceParams, RootNotification, RootParams, RootSummary,
};

use crate::scan::{path_key, scan_root};
use crate::store::{RootStore, StoreError};
use crate::watcher::{FileWatcher, RawFsEvent};

/// Buffered notifications per subscriber before it is considered lagging.
pub const NOTIFICATION_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RpcServerState {
    store: Arc<RwLock<RootStore>>,
    notifier: broadcast::Sender<RootNotification>,
    shutdown_notifier: Option<broadcast::Sender<()>>,
    watching: Option<Watching>,
}

/// Live watchers keyed by root path, all feeding one pipeline.
#[derive(Clone)]
struct Watching {
    raw_tx: mpsc::Sender<RawFsEvent>,
    watchers: Arc<Mutex<HashMap<String, FileWatcher>>>,
}

impl Default for RpcServerState {
    fn default() -> Self {
        Self::new(RootStore::default())
    }
}

impl RpcServerState {
    pub fn new(store: RootStore) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            store: Arc::new(RwLock::new(store)),
            notifier,
            shutdown_notifier: None,
            watching: None,
        }
    }

    pub fn with_shutdown_notifier(mut self, shutdown_notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(shutdown_notifier);
        self
    }

    /// Start a file watcher for every root opened from now on.
    pub fn with_watcher(mut self, raw_tx: mpsc::Sender<RawFsEvent>) -> Self {
        self.watching = Some(Watching { raw_tx, watchers: Arc::default() });
        self
    }

    pub fn store(&self) -> &Arc<RwLock<RootStore>> {
        &self.store
    }

    pub fn notifier(&self) -> &broadcast::Sender<RootNotification> {
        &self.notifier
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RootNotification> {
        self.notifier.subscribe()
    }

    pub fn notify(&self, notification: RootNotification) {
        // No subscribers is not an error.
        let _ = self.notifier.send(notification);
    }

    /// Scan `path`, make it an open root and start watching it.
    pub async fn open_root(&self, path: &Path) -> Result<RootSummary> {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("root does not exist: {}", path.display()))?;
        let scan_path = canonical.clone();
        let descriptor = tokio::task::spawn_blocking(move || scan_root(&scan_path))
            .await
            .context("root scan task failed")??;
        let root_path = descriptor.path().to_string();

        if let Some(watching) = &self.watching {
            let watcher = FileWatcher::start(&canonical, watching.raw_tx.clone())?;
            lock_watchers(&watching.watchers).insert(root_path.clone(), watcher);
        }

        let version = self.store.write().await.open(descriptor);
        self.notify(RootNotification::RootChanged { root_path: root_path.clone() });
        Ok(RootSummary { root_path, version })
    }

    /// Close a root. Returns false when it was not open.
    pub async fn close_root(&self, root_path: &str) -> bool {
        if let Some(watching) = &self.watching {
            lock_watchers(&watching.watchers).remove(root_path);
        }
        let closed = self.store.write().await.close(root_path);
        if closed {
            self.notify(RootNotification::RootRemoved { root_path: root_path.to_string() });
        }
        closed
    }

    pub async fn list_roots(&self) -> Vec<RootSummary> {
        self.store
            .read()
            .await
            .roots()
            .into_iter()
            .map(|(root_path, version)| RootSummary { root_path, version })
            .collect()
    }
}

fn lock_watchers(
    watchers: &Mutex<HashMap<String, FileWatcher>>,
) -> std::sync::MutexGuard<'_, HashMap<String, FileWatcher>> {
    // A panic while holding the map cannot leave it logically inconsistent.
    watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub async fn handle_raw_request(raw: &[u8], state: &RpcServerState) -> Response {
    let request = match serde_json::from_slice::<Request>(raw) {
        Ok(request) => request,
        Err(error) => {
            return Response::error(
                RequestId::Null,
                RpcError {
                    code: PARSE_ERROR,
                    message: "Parse error".to_string(),
                    data: Some(json!({ "reason": error.to_string() })),
                },
            );
        }
    };

    if request.jsonrpc != "2.0" {
        return Response::error(
            request.id,
            RpcError { code: INVALID_REQUEST, message: "Invalid Request".to_string(), data: None },
        );
    }

    if let Some(version) = request.protocol_version.as_deref() {
        if !is_supported_protocol_version(version) {
            return Response::error(
                request.id,
                RpcError {
                    code: INVALID_REQUEST,
                    message: "Unsupported protocol version".to_string(),
                    data: Some(json!({ "protocol_version": version })),
                },
            );
        }
    }

    dispatch_request(request, state).await
}

pub async fn dispatch_request(request: Request, state: &RpcServerState) -> Response {
    match request.method.as_str() {
        RPC_PING => Response::success(request.id, json!({ "ok": true })),
        DAEMON_SHUTDOWN => {
            if let Some(notifier) = &state.shutdown_notifier {
                let _ = notifier.send(());
            }
            Response::success(request.id, json!({ "ok": true }))
        }
        TREE_CHANGES_SINCE => handle_changes_since(request, state).await,
        TREE_INITIAL => {
            let snapshots = state.store.read().await.initial_tree_data();
            to_success(request.id, &snapshots)
        }
        TREE_SUBSCRIBE => {
            Response::success(request.id, json!({ "ok": true, "notifications": NOTIFICATIONS }))
        }
        ROOT_OPEN => handle_root_open(request, state).await,
        ROOT_CLOSE => handle_root_close(request, state).await,
        ROOT_LIST => {
            let roots = state.list_roots().await;
            Response::success(request.id, json!({ "roots": roots }))
        }
        _ => Response::error(
            request.id,
            RpcError {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: None,
            },
        ),
    }
}

async fn handle_changes_since(request: Request, state: &RpcServerState) -> Response {
    let params: ChangesSinceParams = match parse_params(request.params, request.id.clone(), TREE_CHANGES_SINCE) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let result = state.store.read().await.changes_since(&params.root_path, params.version);
    match result {
        Ok(changes) => to_success(request.id, &changes),
        Err(error) => store_error_response(request.id, error),
    }
}

async fn handle_root_open(request: Request, state: &RpcServerState) -> Response {
    let params: RootParams = match parse_params(request.params, request.id.clone(), ROOT_OPEN) {
        Ok(params) => params,
        Err(response) => return response,
    };

    match state.open_root(&PathBuf::from(&params.root_path)).await {
        Ok(summary) => {
            info!(root_path = %summary.root_path, version = summary.version, "root opened over rpc");
            to_success(request.id, &summary)
        }
        Err(error) => {
            warn!(root_path = %params.root_path, error = %error, "root.open failed");
            invalid_params_response(request.id, format!("{error:#}"))
        }
    }
}

async fn handle_root_close(request: Request, state: &RpcServerState) -> Response {
    let params: RootParams = match parse_params(request.params, request.id.clone(), ROOT_CLOSE) {
        Ok(params) => params,
        Err(response) => return response,
    };

    // Accept both the tree key and a not-yet-normalized filesystem path.
    let root_path = path_key(Path::new(&params.root_path)).unwrap_or(params.root_path);
    let closed = state.close_root(&root_path).await;
    Response::success(request.id, json!({ "closed": closed }))
}

fn parse_params<T: DeserializeOwned>(
    params: Option<serde_json::Value>,
    request_id: RequestId,
    method: &str,
) -> Result<T, Response> {
    let Some(params) = params else {
        return Err(invalid_params_response(request_id, format!("{method} requires params")));
    };

    serde_json::from_value::<T>(params).map_err(|error| {
        invalid_params_response(request_id, format!("failed to decode {method} params: {error}"))
    })
}

fn to_success<T: Serialize>(request_id: RequestId, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(result) => Response::success(request_id, result),
        Err(error) => Response::error(
            request_id,
            RpcError {
                code: INTERNAL_ERROR,
                message: "Internal error".to_string(),
                data: Some(json!({ "reason": error.to_string() })),
            },
        ),
    }
}

fn store_error_response(request_id: RequestId, error: StoreError) -> Response {
    match error {
        StoreError::RootNotFound(root_path) => Response::error(
            request_id,
            RpcError {
                code: ROOT_NOT_FOUND,
                message: "Root not found".to_string(),
                data: Some(json!({ "root_path": root_path })),
            },
        ),
        other => Response::error(
            request_id,
            RpcError {
                code: INTERNAL_ERROR,
                message: "Internal error".to_string(),
                data: Some(json!({ "reason": other.to_string() })),
            },
        ),
    }
}

fn invalid_params_response(request_id: RequestId, reason: String) -> Response {
    Response::error(
        request_id,
        RpcError {
            code: INVALID_PARAMS,
            message: "Invalid params".to_string(),
            data: Some(json!({ "reason": reason })),
        },
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{json, Value};
    use tempfile::TempDir;
    use treesync_common::descriptor::{ChangesSince, Snapshot};

    use super::*;

    fn request(method: &str, params: Option<Value>) -> Request {
        Request::new(method, params, RequestId::Number(7))
    }

    async fn call(state: &RpcServerState, method: &str, params: Option<Value>) -> Response {
        dispatch_request(request(method, params), state).await
    }

    fn temp_root() -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.md"), "# B").unwrap();
        fs::write(tmp.path().join("a.md"), "# A").unwrap();
        let key = path_key(&tmp.path().canonicalize().unwrap()).unwrap();
        (tmp, key)
    }

    #[tokio::test]
    async fn ping_and_unknown_method() {
        let state = RpcServerState::default();
        let ping = call(&state, RPC_PING, None).await;
        assert_eq!(ping.result, Some(json!({ "ok": true })));

        let unknown = call(&state, "tree.nope", None).await;
        assert_eq!(unknown.error.expect("error").code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn parse_errors_and_version_checks() {
        let state = RpcServerState::default();
        let garbage = handle_raw_request(b"{not json", &state).await;
        assert_eq!(garbage.id, RequestId::Null);
        assert_eq!(garbage.error.expect("error").code, PARSE_ERROR);

        let mut old = request(RPC_PING, None);
        old.protocol_version = Some("treesync-rpc.v0".to_string());
        let raw = serde_json::to_vec(&old).unwrap();
        let rejected = handle_raw_request(&raw, &state).await;
        assert_eq!(rejected.error.expect("error").code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn changes_since_requires_params_and_known_root() {
        let state = RpcServerState::default();
        let missing = call(&state, TREE_CHANGES_SINCE, None).await;
        assert_eq!(missing.error.expect("error").code, INVALID_PARAMS);

        let unknown =
            call(&state, TREE_CHANGES_SINCE, Some(json!({ "root_path": "/nowhere", "version": 1 }))).await;
        let error = unknown.error.expect("error");
        assert_eq!(error.code, ROOT_NOT_FOUND);
        assert_eq!(error.data, Some(json!({ "root_path": "/nowhere" })));
    }

    #[tokio::test]
    async fn snapshot_then_changes_since_its_version_is_empty() {
        let state = RpcServerState::default();
        let (_tmp, root) = temp_root();
        state.open_root(Path::new(&root)).await.unwrap();

        let initial = call(&state, TREE_INITIAL, None).await;
        let snapshots: Vec<Snapshot> = serde_json::from_value(initial.result.unwrap()).unwrap();
        assert_eq!(snapshots.len(), 1);
        let names: Vec<&str> =
            snapshots[0].descriptor.children().iter().map(|child| child.name()).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);

        let since = call(
            &state,
            TREE_CHANGES_SINCE,
            Some(json!({ "root_path": root, "version": snapshots[0].version })),
        )
        .await;
        assert_eq!(since.result, Some(json!([])));
        let decoded: ChangesSince = serde_json::from_value(since.result.unwrap()).unwrap();
        assert_eq!(decoded, ChangesSince::Changes(Vec::new()));
    }

    #[tokio::test]
    async fn open_list_close_roundtrip_notifies_subscribers() {
        let state = RpcServerState::default();
        let mut events = state.subscribe_notifications();
        let (_tmp, root) = temp_root();

        let opened = call(&state, ROOT_OPEN, Some(json!({ "root_path": root }))).await;
        assert_eq!(opened.result, Some(json!({ "root_path": root, "version": 0 })));
        assert_eq!(
            events.recv().await.unwrap(),
            RootNotification::RootChanged { root_path: root.clone() }
        );

        let listed = call(&state, ROOT_LIST, None).await;
        assert_eq!(listed.result, Some(json!({ "roots": [{ "root_path": root, "version": 0 }] })));

        let closed = call(&state, ROOT_CLOSE, Some(json!({ "root_path": root }))).await;
        assert_eq!(closed.result, Some(json!({ "closed": true })));
        assert_eq!(
            events.recv().await.unwrap(),
            RootNotification::RootRemoved { root_path: root.clone() }
        );

        let again = call(&state, ROOT_CLOSE, Some(json!({ "root_path": root }))).await;
        assert_eq!(again.result, Some(json!({ "closed": false })));
    }

    #[tokio::test]
    async fn open_missing_root_is_invalid_params() {
        let state = RpcServerState::default();
        let response =
            call(&state, ROOT_OPEN, Some(json!({ "root_path": "/definitely/not/here" }))).await;
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn shutdown_fires_notifier() {
        let (tx, mut rx) = broadcast::channel(1);
        let state = RpcServerState::default().with_shutdown_notifier(tx);
        let response = call(&state, DAEMON_SHUTDOWN, None).await;
        assert!(response.error.is_none());
        assert!(rx.recv().await.is_ok());
    }
}
