//! sluice-core — message and response types, the producer/consumer
//! contracts, close signalling, configuration, and counters.
//! All other sluice crates depend on this one.

pub mod config;
pub mod fabric;
pub mod message;
pub mod metrics;
pub mod response;
pub mod shutdown;

pub use fabric::{couple, Consumer, FabricError, Producer};
pub use message::Message;
pub use metrics::{Metrics, MetricsSnapshot};
pub use response::{DispatchError, Response};
pub use shutdown::{CloseWatcher, Shutdown};
