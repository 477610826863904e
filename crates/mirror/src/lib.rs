// treesync-mirror: consumer-side tree mirror and daemon client.

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mirror;
pub mod registry;
pub mod scheduler;
