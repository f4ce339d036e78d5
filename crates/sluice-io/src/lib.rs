//! sluice-io — the bridge's edge adapters: an HTTP ingress producer, an
//! HTTP egress consumer, and mock endpoints for driving either side of an
//! edge from tests.

pub mod input;
pub mod output;

pub use input::http_server::HttpServer;
pub use input::mock::{MockInput, MockInputHandle};
pub use output::http_client::HttpClient;
pub use output::mock::{MockOutput, MockOutputHandle};
