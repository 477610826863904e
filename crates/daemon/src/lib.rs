// treesync-daemon library entry point.

pub mod config;
pub mod history;
pub mod rpc;
pub mod runtime;
pub mod scan;
pub mod startup;
pub mod store;
pub mod watcher;
