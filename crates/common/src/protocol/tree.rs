// Parameter and notification payloads for the tree feed methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jsonrpc::Notification;
use super::rpc_methods::{NOTIFY_ROOT_CHANGED, NOTIFY_ROOT_REMOVED};

/// `tree.changes_since` params. A missing `version` asks for a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangesSinceParams {
    pub root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Params for methods addressing a single root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootParams {
    pub root_path: String,
}

/// `root.open` result and `root.list` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootSummary {
    pub root_path: String,
    pub version: u64,
}

/// Daemon → mirror push events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootNotification {
    RootChanged { root_path: String },
    RootRemoved { root_path: String },
}

impl RootNotification {
    pub fn root_path(&self) -> &str {
        match self {
            Self::RootChanged { root_path } | Self::RootRemoved { root_path } => root_path,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::RootChanged { .. } => NOTIFY_ROOT_CHANGED,
            Self::RootRemoved { .. } => NOTIFY_ROOT_REMOVED,
        }
    }

    pub fn to_notification(&self) -> Notification {
        let params = RootParams { root_path: self.root_path().to_string() };
        Notification::new(self.method(), serde_json::to_value(params).ok())
    }

    /// Decode a pushed notification. Unknown methods yield `None`.
    pub fn from_notification(notification: &Notification) -> Option<Self> {
        let params: RootParams =
            serde_json::from_value(notification.params.clone().unwrap_or(Value::Null)).ok()?;
        match notification.method.as_str() {
            NOTIFY_ROOT_CHANGED => Some(Self::RootChanged { root_path: params.root_path }),
            NOTIFY_ROOT_REMOVED => Some(Self::RootRemoved { root_path: params.root_path }),
            _ => None,
        }
    }
}
