//! Producers — components that emit messages into the bridge.

pub mod http_server;
pub mod mock;
