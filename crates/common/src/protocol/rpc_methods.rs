// RPC method name constants, derived from contracts/tree-rpc-methods.json.

// ── Daemon-internal ────────────────────────────────────────────────
pub const RPC_PING: &str = "rpc.ping";
pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";

// ── Tree feed ──────────────────────────────────────────────────────
pub const TREE_CHANGES_SINCE: &str = "tree.changes_since";
pub const TREE_INITIAL: &str = "tree.initial";
pub const TREE_SUBSCRIBE: &str = "tree.subscribe";

// ── Roots ──────────────────────────────────────────────────────────
pub const ROOT_OPEN: &str = "root.open";
pub const ROOT_CLOSE: &str = "root.close";
pub const ROOT_LIST: &str = "root.list";

// ── Notifications (daemon → mirror) ────────────────────────────────
pub const NOTIFY_ROOT_CHANGED: &str = "tree.root_changed";
pub const NOTIFY_ROOT_REMOVED: &str = "tree.root_removed";

/// All methods the daemon currently dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    RPC_PING,
    DAEMON_SHUTDOWN,
    TREE_CHANGES_SINCE,
    TREE_INITIAL,
    TREE_SUBSCRIBE,
    ROOT_OPEN,
    ROOT_CLOSE,
    ROOT_LIST,
];

/// Notifications pushed on subscribed connections.
pub const NOTIFICATIONS: &[&str] = &[NOTIFY_ROOT_CHANGED, NOTIFY_ROOT_REMOVED];
